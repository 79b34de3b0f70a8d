use tracing::{debug, info};

use crate::pdf::PageText;

use super::section::LeafRecord;

/// How far past the cursor a code search may look before giving up.
const LOOKAHEAD_PAGES: usize = 10;
/// How many upcoming leaves contribute codes to a rescue search.
const RESCUE_WINDOW: usize = 10;

/// Where the next document starts, as decided for one leaf. When
/// `print_all_remaining` is set the emitter consumes everything up to the
/// section (or document) end; `next_start` then carries that end when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrintPlan {
    pub print_all_remaining: bool,
    pub next_start: Option<usize>,
}

/// Content-based boundary resolution over the ordered leaf sequence.
///
/// Outline-declared start pages are occasionally wrong, so the page where
/// the next leaf's analytic code actually appears is the ground truth. This
/// type never fails: every miss degrades to an over-inclusive plan.
pub struct BoundaryResolver<'a, P: PageText> {
    pages: &'a mut P,
    leaves: &'a [LeafRecord],
    section_ends: Vec<usize>,
    doc_end: usize,
}

impl<'a, P: PageText> BoundaryResolver<'a, P> {
    /// `document_starts` are the start pages of the document-level sections
    /// in order; `doc_end` is one past the last logical page.
    pub fn new(
        pages: &'a mut P,
        leaves: &'a [LeafRecord],
        document_starts: &[usize],
        doc_end: usize,
    ) -> Self {
        let mut section_ends: Vec<usize> =
            document_starts.iter().skip(1).copied().collect();
        section_ends.push(doc_end);
        BoundaryResolver {
            pages,
            leaves,
            section_ends,
            doc_end,
        }
    }

    /// End of the document-level section still open at `cursor`.
    pub fn section_end(&self, cursor: usize) -> usize {
        self.section_ends
            .iter()
            .copied()
            .find(|&end| end > cursor)
            .unwrap_or(self.doc_end)
    }

    /// Plan the boundary for the leaf being printed at `cursor`;
    /// `next_index` is the index of the following leaf.
    pub fn plan(&mut self, next_index: usize, cursor: usize) -> PrintPlan {
        let section_end = self.section_end(cursor);

        if next_index >= self.leaves.len() {
            debug!(cursor, section_end, "no leaf follows, printing to section end");
            return PrintPlan {
                print_all_remaining: true,
                next_start: Some(section_end),
            };
        }

        let next_code = vec![self.leaves[next_index].code.clone()];
        let mut next_start = self.find_page(&next_code, cursor, section_end);

        if next_start.is_none() {
            info!(
                code = %next_code[0],
                "next analytic code not found, attempting rescue for an omitted bookmark"
            );
            let rescue_codes: Vec<String> = self.leaves
                [(next_index + 1).min(self.leaves.len())
                    ..(next_index + RESCUE_WINDOW).min(self.leaves.len())]
                .iter()
                .map(|leaf| leaf.code.clone())
                .collect();
            if !rescue_codes.is_empty() {
                info!(codes = ?rescue_codes, "trying rescue analytic codes");
                next_start = self.find_page(&rescue_codes, cursor, section_end);
            }
        }

        match next_start {
            Some(page) => PrintPlan {
                print_all_remaining: false,
                next_start: Some(page),
            },
            None => PrintPlan {
                print_all_remaining: true,
                next_start: None,
            },
        }
    }

    fn find_page(&mut self, codes: &[String], cursor: usize, section_end: usize) -> Option<usize> {
        let limit = section_end
            .min(self.pages.len())
            .min(cursor + LOOKAHEAD_PAGES);
        for page in cursor..limit {
            let Some(text) = self.pages.text(page) else {
                continue;
            };
            for code in codes {
                if text.contains(code.as_str()) {
                    return Some(page);
                }
            }
        }
        info!(
            pages = LOOKAHEAD_PAGES,
            codes = ?codes,
            "browsed the lookahead window without finding a code, search aborted"
        );
        None
    }
}
