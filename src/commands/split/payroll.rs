use std::collections::HashSet;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::{FieldRule, PayrollRules};
use crate::error::SplitError;
use crate::util::fold_ascii;

/// Marker some preprocessor builds print on partial extraction failures
/// while still exiting 0.
const ERROR_MARKER: &str = "Error (";

const HONORIFICS: [&str; 3] = ["Mlle ", "Mme ", "M "];

const NO_NAME: &str = "NO_NAME_FOUND";

/// Extracts the (analytic code, employee name) pair of one payroll page by
/// running the external preprocessor and parsing its labeled output lines.
pub struct PayrollFieldExtractor<'a> {
    preprocessor: &'a Path,
    rules: &'a PayrollRules,
    pdf_path: &'a Path,
}

impl<'a> PayrollFieldExtractor<'a> {
    pub fn new(preprocessor: &'a Path, rules: &'a PayrollRules, pdf_path: &'a Path) -> Self {
        PayrollFieldExtractor {
            preprocessor,
            rules,
            pdf_path,
        }
    }

    /// `page_index` is 0-based; the external tool takes 1-based page numbers.
    pub fn extract(&self, page_index: usize) -> Result<(String, String), SplitError> {
        let page_number = page_index + 1;
        let command_line = format!(
            "{} {} {}",
            self.preprocessor.display(),
            self.pdf_path.display(),
            page_number
        );
        debug!(command = %command_line, "running payroll preprocessor");

        let output = Command::new(self.preprocessor)
            .arg(self.pdf_path)
            .arg(page_number.to_string())
            .output()
            .map_err(|err| SplitError::Parse {
                page: page_index,
                command: command_line.clone(),
                detail: format!("failed to launch preprocessor: {err}"),
            })?;

        if !output.status.success() {
            return Err(SplitError::Parse {
                page: page_index,
                command: command_line,
                detail: format!("preprocessor failed with {}", output.status),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains(ERROR_MARKER) {
            let dump = self.dump_raw_output(page_number, &stdout);
            return Err(SplitError::Parse {
                page: page_index,
                command: command_line,
                detail: format!("preprocessor reported an extraction error, raw output in {dump}"),
            });
        }

        let lines: Vec<&str> = stdout.lines().collect();
        let code = parse_field(&lines, &self.rules.code).map_err(|detail| SplitError::Parse {
            page: page_index,
            command: command_line.clone(),
            detail,
        })?;
        if code.is_empty() {
            return Err(SplitError::Parse {
                page: page_index,
                command: command_line,
                detail: "empty analytic code".to_string(),
            });
        }

        let name = parse_field(&lines, &self.rules.name).map_err(|detail| SplitError::Parse {
            page: page_index,
            command: command_line.clone(),
            detail,
        })?;
        let name = strip_honorific(&name);
        let name = if name.is_empty() {
            NO_NAME.to_string()
        } else {
            name
        };

        info!(page = page_index, code = %code, name = %name, "payroll fields extracted");
        Ok((code, name))
    }

    fn dump_raw_output(&self, page_number: usize, raw: &str) -> String {
        let path = std::env::temp_dir().join(format!(
            "ledgersplit_payroll_{}_{}.txt",
            std::process::id(),
            page_number
        ));
        match std::fs::write(&path, raw) {
            Ok(()) => path.display().to_string(),
            Err(err) => {
                warn!(error = %err, "could not dump preprocessor output");
                "<dump failed>".to_string()
            }
        }
    }
}

/// Apply one positional rule to the preprocessor output.
fn parse_field(lines: &[&str], rule: &FieldRule) -> Result<String, String> {
    let mut value = line_at(lines, rule.line);
    if value.trim().is_empty() {
        if let Some(alternate) = rule.alternate_line {
            value = line_at(lines, alternate);
        }
    }
    if value.trim().is_empty() {
        return Err(format!(
            "no text on output line {} (alternate: {:?})",
            rule.line, rule.alternate_line
        ));
    }

    let sliced = slice_columns(value, rule);
    let trimmed = sliced.trim();

    match &rule.prefix {
        Some(prefix) => match trimmed.strip_prefix(prefix.as_str()) {
            Some(rest) => Ok(rest.trim().to_string()),
            None => Err(format!(
                "expected output marker {prefix:?} on line {}",
                rule.line
            )),
        },
        None => Ok(trimmed.to_string()),
    }
}

fn line_at<'s>(lines: &[&'s str], index: usize) -> &'s str {
    lines.get(index).copied().unwrap_or("")
}

fn slice_columns(value: &str, rule: &FieldRule) -> String {
    if rule.column.is_none() && rule.end_column.is_none() {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    let start = rule.column.unwrap_or(0).min(chars.len());
    let end = rule.end_column.unwrap_or(chars.len()).min(chars.len()).max(start);
    chars[start..end].iter().collect()
}

pub fn strip_honorific(name: &str) -> String {
    let trimmed = name.trim();
    for prefix in HONORIFICS {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// One output document of the payroll path: a run of consecutive pages
/// carrying the same (code, name) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollRecord {
    pub code: String,
    pub name: String,
    pub start_page: usize,
    pub page_count: usize,
}

/// Groups consecutive same-key pages into records. A key that reappears
/// after a different record started is a duplicated, non-adjacent payslip:
/// merging would silently lose the gap, so the file is aborted instead.
pub struct RecordAccumulator {
    seen: HashSet<String>,
    current: Option<(String, PayrollRecord)>,
}

impl RecordAccumulator {
    pub fn new() -> Self {
        RecordAccumulator {
            seen: HashSet::new(),
            current: None,
        }
    }

    /// Feed one page; returns the previous record when this page opens a
    /// new one.
    pub fn push(
        &mut self,
        page: usize,
        code: String,
        name: String,
    ) -> Result<Option<PayrollRecord>, SplitError> {
        let key = format!("{}_{}", fold_ascii(&name), fold_ascii(&code));

        if let Some((current_key, record)) = &mut self.current {
            if *current_key == key {
                record.page_count += 1;
                debug!(page, key = %key, "page continues the current payroll record");
                return Ok(None);
            }
        }

        if !self.seen.insert(key.clone()) {
            return Err(SplitError::Incoherence(format!("{key} already registered")));
        }

        let finished = self
            .current
            .replace((
                key,
                PayrollRecord {
                    code,
                    name,
                    start_page: page,
                    page_count: 1,
                },
            ))
            .map(|(_, record)| record);
        Ok(finished)
    }

    /// Close out the record in progress, if any.
    pub fn finish(&mut self) -> Option<PayrollRecord> {
        self.current.take().map(|(_, record)| record)
    }
}
