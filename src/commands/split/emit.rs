use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use lopdf::Document;
use tracing::{debug, error};

use crate::error::SplitError;
use crate::pdf;
use crate::session::RunSession;
use crate::util::slugify;

use super::boundary::PrintPlan;
use super::section::LeafRecord;

/// Writes one output file per resolved page range and refuses to overwrite
/// anything it has already produced in this run.
pub struct DocumentEmitter<'a> {
    source: &'a Document,
    /// 1-indexed physical page backing logical page 0.
    page_base: u32,
    output_dir: PathBuf,
    problem_dir: PathBuf,
    reverse_naming: bool,
    verify: bool,
    written: HashSet<PathBuf>,
}

impl<'a> DocumentEmitter<'a> {
    pub fn new(
        source: &'a Document,
        page_base: u32,
        output_dir: PathBuf,
        problem_dir: PathBuf,
        reverse_naming: bool,
        verify: bool,
    ) -> Result<Self, SplitError> {
        fs::create_dir_all(&output_dir)?;
        Ok(DocumentEmitter {
            source,
            page_base,
            output_dir,
            problem_dir,
            reverse_naming,
            verify,
            written: HashSet::new(),
        })
    }

    /// Emit the leaf being printed at `cursor` according to `plan`, and
    /// return the new cursor. `end_bound` caps print-all-remaining output at
    /// the enclosing section's end.
    pub fn emit(
        &mut self,
        leaf: &LeafRecord,
        plan: &PrintPlan,
        cursor: usize,
        end_bound: usize,
        session: &mut RunSession,
    ) -> Result<usize, SplitError> {
        let next = plan.next_start.unwrap_or(end_bound);
        if plan.print_all_remaining {
            debug!(from = cursor, to = next, code = %leaf.code, "printing all remaining pages");
        } else if next == cursor {
            session.warn_file(format!(
                "two analytic codes on page {cursor}: emitting a single page for {}",
                leaf.code
            ));
        }
        // never emit an empty document, whatever the resolver believed
        let count = next.saturating_sub(cursor).max(1);

        self.emit_range(leaf, cursor, count, session)?;
        Ok(cursor + count)
    }

    /// Copy `count` logical pages starting at `start` into a fresh output
    /// file named after the leaf.
    pub fn emit_range(
        &mut self,
        leaf: &LeafRecord,
        start: usize,
        count: usize,
        session: &mut RunSession,
    ) -> Result<PathBuf, SplitError> {
        let path = self.output_path(leaf);
        if !self.written.insert(path.clone()) {
            return Err(SplitError::Incoherence(format!(
                "already generated a file at {}",
                path.display()
            )));
        }

        let first_physical = self.page_base + start as u32;
        let bytes = pdf::copy_page_span(self.source, first_physical, count)?;
        fs::write(&path, &bytes)?;
        debug!(code = %leaf.code, entity = %leaf.entity, pages = count, "addpages done");
        session.document_written(count, &path);

        if self.verify && !self.written_file_checks_out(&bytes, leaf) {
            let quarantined = self.quarantine(&path)?;
            error!(
                source = %path.display(),
                quarantined = %quarantined.display(),
                "post-write verification failed, file moved to problem directory"
            );
            session.error_document(count, &quarantined);
            return Ok(quarantined);
        }

        Ok(path)
    }

    fn output_path(&self, leaf: &LeafRecord) -> PathBuf {
        let stem = if self.reverse_naming {
            format!("{}_{}", leaf.entity, leaf.code)
        } else {
            format!("{}_{}", leaf.code, leaf.entity)
        };
        let mut slug = slugify(&stem);
        if slug.is_empty() {
            slug = "unnamed".to_string();
        }
        self.output_dir.join(format!("{slug}.pdf"))
    }

    /// Re-extract text from the written bytes and require both the analytic
    /// code and the entity name to literally occur.
    fn written_file_checks_out(&self, bytes: &[u8], leaf: &LeafRecord) -> bool {
        match pdf::document_text(bytes) {
            Ok(text) => text.contains(&leaf.code) && text.contains(&leaf.entity),
            Err(err) => {
                debug!(error = %err, "could not re-extract text from written document");
                false
            }
        }
    }

    fn quarantine(&self, path: &Path) -> Result<PathBuf, SplitError> {
        fs::create_dir_all(&self.problem_dir)?;
        let destination = match path.file_name() {
            Some(name) => self.problem_dir.join(name),
            None => self.problem_dir.join("unnamed.pdf"),
        };
        fs::rename(path, &destination)?;
        Ok(destination)
    }
}
