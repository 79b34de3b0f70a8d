use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structured form of an input filename, `DOCTYPE_YEAR_MONTH.pdf`.
#[derive(Debug, Clone)]
pub struct InputDescriptor {
    pub doctype: String,
    pub year: String,
    pub month: String,
    pub path: PathBuf,
}

impl InputDescriptor {
    pub fn from_path(path: &Path) -> Result<Self> {
        let pattern = Regex::new(r"(?i)^(?P<doctype>[^_]+)_(?P<year>[0-9]+)_(?P<month>[^_.]+)\.pdf$")
            .context("failed to compile input filename regex")?;

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;

        let captures = pattern.captures(filename).with_context(|| {
            format!("filename does not match DOCTYPE_YEAR_MONTH.pdf: {filename}")
        })?;

        Ok(InputDescriptor {
            doctype: captures["doctype"].to_ascii_lowercase(),
            year: captures["year"].to_string(),
            month: captures["month"].to_string(),
            path: path.to_path_buf(),
        })
    }
}

/// One contiguous slice of an outline-driven file: skip the first
/// `skip_sections` document-level sections, then process at most
/// `main_sections_count` of them (None = all remaining).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutlineSegment {
    pub skip_sections: usize,
    pub main_sections_count: Option<usize>,
}

/// Closed set of splitting strategies, selected by doctype.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Boundaries come from the embedded bookmark tree.
    Outline,
    /// No outline; repeating single-page records identified per page by the
    /// external preprocessor.
    FlatRecords,
    /// Several independently-bookmarked documents concatenated in one file.
    Composite(Vec<OutlineSegment>),
}

pub fn builtin_strategy(doctype: &str) -> Option<Strategy> {
    match doctype {
        "payroll" => Some(Strategy::FlatRecords),
        "treasury" | "result" => Some(Strategy::Outline),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub filename: String,
    pub doctype: String,
    pub year: String,
    pub month: String,
    pub sha256: String,
    pub status: String,
    pub documents_emitted: usize,
    pub pages_emitted: usize,
    pub error_documents: usize,
    pub failure_reason: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunTotals {
    pub files_processed: usize,
    pub files_failed: usize,
    pub documents_emitted: usize,
    pub pages_emitted: usize,
    pub error_documents: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub report_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub duration_seconds: f64,
    pub files: Vec<FileOutcome>,
    pub totals: RunTotals,
}
