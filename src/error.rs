use thiserror::Error;

/// Failures surfaced by the splitting core.
///
/// `Incoherence` and `Parse` abort the current input file; boundary-search
/// misses never reach this type, they degrade inside the resolver.
#[derive(Debug, Error)]
pub enum SplitError {
    /// A data-integrity violation detected by the tool itself: duplicate
    /// output key, duplicate non-adjacent payroll record, filename collision.
    #[error("incoherence: {0}")]
    Incoherence(String),

    /// The external preprocessor failed or produced unusable output.
    #[error("parse failure on page {page}: {detail} (command: {command})")]
    Parse {
        page: usize,
        command: String,
        detail: String,
    },

    #[error("pdf operation failed: {0}")]
    Pdf(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<lopdf::Error> for SplitError {
    fn from(err: lopdf::Error) -> Self {
        SplitError::Pdf(err.to_string())
    }
}
