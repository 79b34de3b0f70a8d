use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::model::OutlineSegment;

/// Positional parse rule for one preprocessor output field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldRule {
    /// 0-based line of the preprocessor output carrying the field.
    pub line: usize,
    /// Fallback line used when the primary line is blank.
    pub alternate_line: Option<usize>,
    /// Optional character range within the line.
    pub column: Option<usize>,
    pub end_column: Option<usize>,
    /// Required marker stripped from the start of the value.
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PayrollRules {
    pub code: FieldRule,
    pub name: FieldRule,
}

impl Default for PayrollRules {
    fn default() -> Self {
        PayrollRules {
            code: FieldRule {
                line: 0,
                prefix: Some("ANCODE ".to_string()),
                ..FieldRule::default()
            },
            name: FieldRule {
                line: 1,
                prefix: Some("NAME ".to_string()),
                ..FieldRule::default()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Cap on pages processed per file, 0 = unlimited.
    pub restrict: usize,
    pub output_root: PathBuf,
    /// Quarantine directory for files failing post-write verification,
    /// relative to the output root.
    pub problem_dir: PathBuf,
    pub payroll_preprocessor: PathBuf,
    /// Flat DOCUMENT->CODE outlines: synthesize the missing entity level.
    pub no_entity_name: bool,
    /// The source outline stores name before analytic code; output names
    /// follow suit.
    pub reverse_naming: bool,
    pub payroll: PayrollRules,
    /// Doctypes made of several independently-bookmarked documents.
    pub composite: HashMap<String, Vec<OutlineSegment>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            restrict: 0,
            output_root: PathBuf::from("."),
            problem_dir: PathBuf::from("problem"),
            payroll_preprocessor: PathBuf::from("./payroll_fields.sh"),
            no_entity_name: false,
            reverse_naming: false,
            payroll: PayrollRules::default(),
            composite: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn load(path: Option<&Path>) -> Result<RunConfig> {
        let Some(path) = path else {
            debug!("no configuration file supplied, using defaults");
            return Ok(RunConfig::default());
        };

        let raw =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: RunConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_defaults() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.restrict, 0);
        assert!(!config.reverse_naming);
        assert_eq!(config.payroll.code.prefix.as_deref(), Some("ANCODE "));
        assert_eq!(config.payroll.name.line, 1);
    }

    #[test]
    fn partial_config_overrides_selected_fields() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "restrict": 40,
                "reverse_naming": true,
                "composite": {
                    "yearend": [
                        {"skip_sections": 0, "main_sections_count": 1},
                        {"skip_sections": 1}
                    ]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.restrict, 40);
        assert!(config.reverse_naming);
        let segments = &config.composite["yearend"];
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].main_sections_count, Some(1));
        assert_eq!(segments[1].skip_sections, 1);
        assert_eq!(segments[1].main_sections_count, None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<RunConfig>(r#"{"restict": 3}"#).is_err());
    }
}
