//! Thin wrapper around the lopdf collaborator: document load, outline tree,
//! per-page raw text, and page-span copy-out. Everything else in the crate
//! talks to PDFs through this module.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::error::SplitError;

/// Node of the native outline tree: either a titled jump target or a
/// container grouping the nodes one level down. Containers follow the leaf
/// they belong to, which mirrors how the accounting exports nest bookmarks.
#[derive(Debug, Clone)]
pub enum OutlineNode {
    Leaf(OutlineLeaf),
    Container(Vec<OutlineNode>),
}

#[derive(Debug, Clone)]
pub struct OutlineLeaf {
    pub title: String,
    /// 1-indexed page number in the source document.
    pub page: u32,
}

pub fn load_document(path: &Path) -> Result<Document, SplitError> {
    Ok(Document::load(path)?)
}

pub fn page_count(doc: &Document) -> usize {
    doc.get_pages().len()
}

/// Read the outline tree, or an empty vec when the document carries none.
pub fn read_outline(doc: &Document) -> Result<Vec<OutlineNode>, SplitError> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .map_err(|_| SplitError::Pdf("no Root in trailer".to_string()))?
        .as_reference()
        .map_err(|_| SplitError::Pdf("Root is not a reference".to_string()))?;
    let catalog = doc.get_object(catalog_id)?.as_dict()?;

    let Ok(outlines_obj) = catalog.get(b"Outlines") else {
        return Ok(Vec::new());
    };
    let outlines = doc.get_object(outlines_obj.as_reference()?)?.as_dict()?;
    let Ok(first_obj) = outlines.get(b"First") else {
        return Ok(Vec::new());
    };

    let page_numbers: HashMap<ObjectId, u32> = doc
        .get_pages()
        .iter()
        .map(|(&number, &id)| (id, number))
        .collect();

    let mut seen = HashSet::new();
    walk_items(doc, first_obj.as_reference()?, &page_numbers, &mut seen)
}

fn walk_items(
    doc: &Document,
    first: ObjectId,
    page_numbers: &HashMap<ObjectId, u32>,
    seen: &mut HashSet<ObjectId>,
) -> Result<Vec<OutlineNode>, SplitError> {
    let mut nodes = Vec::new();
    let mut current = Some(first);

    while let Some(item_id) = current {
        if !seen.insert(item_id) {
            warn!(?item_id, "cycle in outline sibling chain, stopping walk");
            break;
        }
        let item = doc.get_object(item_id)?.as_dict()?;

        let title = item
            .get(b"Title")
            .ok()
            .and_then(string_object_text)
            .unwrap_or_else(|| "(untitled)".to_string());

        match destination_page(doc, item, page_numbers) {
            Some(page) => nodes.push(OutlineNode::Leaf(OutlineLeaf {
                title,
                page,
            })),
            None => warn!(title = %title, "outline entry without resolvable page target, skipping"),
        }

        if let Ok(Ok(child_id)) = item.get(b"First").map(Object::as_reference) {
            let children = walk_items(doc, child_id, page_numbers, seen)?;
            if !children.is_empty() {
                nodes.push(OutlineNode::Container(children));
            }
        }

        current = item.get(b"Next").ok().and_then(|obj| obj.as_reference().ok());
    }

    Ok(nodes)
}

/// Resolve an item's target to a 1-indexed page number. Direct `/Dest`
/// arrays and GoTo actions are supported; named destinations are not.
fn destination_page(
    doc: &Document,
    item: &Dictionary,
    page_numbers: &HashMap<ObjectId, u32>,
) -> Option<u32> {
    let dest = match item.get(b"Dest") {
        Ok(obj) => obj,
        Err(_) => item
            .get(b"A")
            .ok()
            .and_then(|action| resolve_indirect(doc, action))
            .and_then(|action| action.as_dict().ok())
            .and_then(|action| action.get(b"D").ok())?,
    };
    dest_object_page(doc, dest, page_numbers, 0)
}

fn dest_object_page(
    doc: &Document,
    dest: &Object,
    page_numbers: &HashMap<ObjectId, u32>,
    depth: usize,
) -> Option<u32> {
    if depth > 4 {
        return None;
    }
    match dest {
        Object::Array(values) => values
            .first()
            .and_then(|target| target.as_reference().ok())
            .and_then(|id| page_numbers.get(&id).copied()),
        Object::Reference(id) => {
            let resolved = doc.get_object(*id).ok()?;
            dest_object_page(doc, resolved, page_numbers, depth + 1)
        }
        _ => None,
    }
}

fn resolve_indirect<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn string_object_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_pdf_text(bytes)),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-8 first, then UTF-16BE when the BOM is
/// present, then Latin-1.
pub fn decode_pdf_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        if let Ok(text) = String::from_utf16(&units) {
            return text;
        }
    }
    bytes.iter().map(|&byte| byte as char).collect()
}

/// Raw text of one page (1-indexed), concatenated from the content stream's
/// text-showing operators.
pub fn page_text(doc: &Document, page_number: u32) -> Result<String, SplitError> {
    let pages = doc.get_pages();
    let page_id = pages
        .get(&page_number)
        .copied()
        .ok_or_else(|| SplitError::Pdf(format!("page {page_number} does not exist")))?;
    page_text_by_id(doc, page_id)
}

fn page_text_by_id(doc: &Document, page_id: ObjectId) -> Result<String, SplitError> {
    let content = doc.get_page_content(page_id)?;
    let content = lopdf::content::Content::decode(&content)?;

    let mut text = String::new();
    for operation in &content.operations {
        match operation.operator.as_str() {
            "Tj" | "TJ" | "'" | "\"" => {
                for operand in &operation.operands {
                    append_operand_text(&mut text, operand);
                }
                text.push('\n');
            }
            _ => {}
        }
    }
    Ok(text)
}

fn append_operand_text(text: &mut String, operand: &Object) {
    match operand {
        Object::String(bytes, _) => text.push_str(&decode_pdf_text(bytes)),
        Object::Array(values) => {
            for value in values {
                match value {
                    Object::String(_, _) => append_operand_text(text, value),
                    // large negative kerning adjustments stand in for spaces
                    Object::Integer(kern) if *kern < -100 => text.push(' '),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Copy `count` pages starting at `first_page` (1-indexed) into a fresh
/// document and return its serialized bytes. Construction by whitelist:
/// clone, delete everything outside the span, prune orphans, compress.
pub fn copy_page_span(
    doc: &Document,
    first_page: u32,
    count: usize,
) -> Result<Vec<u8>, SplitError> {
    let total = doc.get_pages().len() as u32;
    if first_page == 0 || count == 0 {
        return Err(SplitError::Pdf(format!(
            "invalid page span: start {first_page}, length {count}"
        )));
    }
    let last_page = first_page + count as u32 - 1;
    if last_page > total {
        return Err(SplitError::Pdf(format!(
            "page span {first_page}..={last_page} exceeds document of {total} pages"
        )));
    }

    let mut new_doc = doc.clone();
    let mut pages_to_delete: Vec<u32> = (1..=total)
        .filter(|page| *page < first_page || *page > last_page)
        .collect();
    // delete in reverse so earlier deletions do not shift later numbers
    pages_to_delete.reverse();
    for page in pages_to_delete {
        new_doc.delete_pages(&[page]);
    }

    new_doc.prune_objects();
    new_doc.compress();

    let mut buffer = Vec::new();
    new_doc.save_to(&mut buffer)?;
    Ok(buffer)
}

/// All extractable text of a serialized document, for post-write checks.
pub fn document_text(bytes: &[u8]) -> Result<String, SplitError> {
    let doc = Document::load_mem(bytes)?;
    let pages: BTreeMap<u32, ObjectId> = doc.get_pages();

    let mut text = String::new();
    for (&page_number, &page_id) in pages.iter() {
        match page_text_by_id(&doc, page_id) {
            Ok(page) => text.push_str(&page),
            Err(err) => {
                debug!(page = page_number, error = %err, "no text extracted from written page")
            }
        }
        text.push('\n');
    }
    Ok(text)
}

/// Read access to the logical page sequence of one input document. The seam
/// lets the boundary search run against fake pages in tests.
pub trait PageText {
    fn len(&self) -> usize;
    /// Raw text of a 0-based logical page; `None` when the page is out of
    /// range or its text cannot be extracted.
    fn text(&mut self, page: usize) -> Option<String>;
}

/// Logical view of the loaded document starting at the outline's first
/// target page, with per-page extraction cached.
pub struct PageSet<'a> {
    doc: &'a Document,
    page_base: u32,
    len: usize,
    cache: HashMap<usize, Option<String>>,
}

impl<'a> PageSet<'a> {
    /// `page_base` is the 1-indexed physical page backing logical page 0.
    pub fn new(doc: &'a Document, page_base: u32) -> Self {
        let total = doc.get_pages().len();
        let len = (total as u32 + 1).saturating_sub(page_base) as usize;
        PageSet {
            doc,
            page_base,
            len,
            cache: HashMap::new(),
        }
    }
}

impl PageText for PageSet<'_> {
    fn len(&self) -> usize {
        self.len
    }

    fn text(&mut self, page: usize) -> Option<String> {
        if page >= self.len {
            return None;
        }
        if let Some(cached) = self.cache.get(&page) {
            return cached.clone();
        }
        let physical = self.page_base + page as u32;
        let extracted = match page_text(self.doc, physical) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(page = physical, error = %err, "page text extraction failed");
                None
            }
        };
        self.cache.insert(page, extracted.clone());
        extracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pdf_text_handles_utf16be() {
        let bytes = [0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9];
        assert_eq!(decode_pdf_text(&bytes), "Aé");
    }

    #[test]
    fn decode_pdf_text_falls_back_to_latin1() {
        let bytes = [0x43, 0x61, 0x66, 0xE9];
        assert_eq!(decode_pdf_text(&bytes), "Café");
    }

    #[test]
    fn append_operand_text_inserts_spaces_for_kerning() {
        let mut text = String::new();
        let operand = Object::Array(vec![
            Object::String(b"AC".to_vec(), lopdf::StringFormat::Literal),
            Object::Integer(-250),
            Object::String(b"1001".to_vec(), lopdf::StringFormat::Literal),
        ]);
        append_operand_text(&mut text, &operand);
        assert_eq!(text, "AC 1001");
    }
}
