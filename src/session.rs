use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::model::{FileOutcome, InputDescriptor, RunReport, RunTotals};
use crate::util::{now_utc_string, utc_compact_string};

/// Per-invocation counters and outcomes, passed by reference into the
/// resolve/emit path. Replaces nothing at process scope: one run, one value.
pub struct RunSession {
    run_id: String,
    started: Instant,
    files: Vec<FileOutcome>,
    current: Option<FileOutcome>,
}

impl RunSession {
    pub fn new() -> Self {
        RunSession {
            run_id: format!("split-{}", utc_compact_string(Utc::now())),
            started: Instant::now(),
            files: Vec::new(),
            current: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn begin_file(&mut self, descriptor: &InputDescriptor, sha256: String) {
        self.flush_current();
        let filename = descriptor
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| descriptor.path.display().to_string());
        self.current = Some(FileOutcome {
            filename,
            doctype: descriptor.doctype.clone(),
            year: descriptor.year.clone(),
            month: descriptor.month.clone(),
            sha256,
            status: "in-progress".to_string(),
            documents_emitted: 0,
            pages_emitted: 0,
            error_documents: 0,
            failure_reason: None,
            warnings: Vec::new(),
        });
    }

    pub fn document_written(&mut self, pages: usize, path: &Path) {
        info!(pages, path = %path.display(), "wrote output document");
        if let Some(current) = &mut self.current {
            current.documents_emitted += 1;
            current.pages_emitted += pages;
        }
    }

    pub fn error_document(&mut self, pages: usize, path: &Path) {
        error!(pages, path = %path.display(), "output document failed verification");
        if let Some(current) = &mut self.current {
            current.error_documents += 1;
        }
    }

    pub fn warn_file(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        if let Some(current) = &mut self.current {
            current.warnings.push(message);
        }
    }

    pub fn finish_file(&mut self) {
        if let Some(current) = &mut self.current {
            current.status = "completed".to_string();
            info!(
                file = %current.filename,
                documents = current.documents_emitted,
                pages = current.pages_emitted,
                "input file completed"
            );
        }
        self.flush_current();
    }

    pub fn fail_file(&mut self, reason: &str) {
        if let Some(current) = &mut self.current {
            current.status = "failed".to_string();
            current.failure_reason = Some(reason.to_string());
        }
        self.flush_current();
    }

    /// Record a failure for a path that never produced a descriptor.
    pub fn fail_unparsed(&mut self, path: &Path, reason: &str) {
        self.flush_current();
        self.files.push(FileOutcome {
            filename: path.display().to_string(),
            doctype: String::new(),
            year: String::new(),
            month: String::new(),
            sha256: String::new(),
            status: "failed".to_string(),
            documents_emitted: 0,
            pages_emitted: 0,
            error_documents: 0,
            failure_reason: Some(reason.to_string()),
            warnings: Vec::new(),
        });
    }

    pub fn failed_files(&self) -> usize {
        self.files
            .iter()
            .chain(self.current.iter())
            .filter(|outcome| outcome.status == "failed")
            .count()
    }

    pub fn into_report(mut self) -> RunReport {
        self.flush_current();
        let totals = RunTotals {
            files_processed: self.files.len(),
            files_failed: self
                .files
                .iter()
                .filter(|outcome| outcome.status == "failed")
                .count(),
            documents_emitted: self.files.iter().map(|f| f.documents_emitted).sum(),
            pages_emitted: self.files.iter().map(|f| f.pages_emitted).sum(),
            error_documents: self.files.iter().map(|f| f.error_documents).sum(),
        };
        RunReport {
            report_version: 1,
            run_id: self.run_id,
            generated_at: now_utc_string(),
            duration_seconds: self.started.elapsed().as_secs_f64(),
            files: self.files,
            totals,
        }
    }

    fn flush_current(&mut self) {
        if let Some(outcome) = self.current.take() {
            self.files.push(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn descriptor() -> InputDescriptor {
        InputDescriptor {
            doctype: "treasury".to_string(),
            year: "2023".to_string(),
            month: "04".to_string(),
            path: PathBuf::from("/in/treasury_2023_04.pdf"),
        }
    }

    #[test]
    fn totals_accumulate_across_files() {
        let mut session = RunSession::new();
        session.begin_file(&descriptor(), "abc".to_string());
        session.document_written(3, Path::new("/out/a.pdf"));
        session.document_written(2, Path::new("/out/b.pdf"));
        session.finish_file();

        session.begin_file(&descriptor(), "def".to_string());
        session.fail_file("boom");

        assert_eq!(session.failed_files(), 1);
        let report = session.into_report();
        assert_eq!(report.totals.files_processed, 2);
        assert_eq!(report.totals.files_failed, 1);
        assert_eq!(report.totals.documents_emitted, 2);
        assert_eq!(report.totals.pages_emitted, 5);
        assert_eq!(report.files[1].failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn warnings_attach_to_the_current_file() {
        let mut session = RunSession::new();
        session.begin_file(&descriptor(), "abc".to_string());
        session.warn_file("two analytic codes on one page");
        session.finish_file();

        let report = session.into_report();
        assert_eq!(report.files[0].warnings.len(), 1);
    }
}
