use tracing::{debug, error, warn};

use crate::pdf::{OutlineLeaf, OutlineNode};

use super::section::{Section, SectionLevel};

/// Converts the native outline tree into a `Section` forest.
///
/// The first leaf encountered fixes the page offset for the whole walk:
/// bookmark targets are expressed in the document's 1-indexed page space,
/// sections in a 0-based space where the tree's first target is page 0.
pub struct OutlineWalker {
    offset: Option<u32>,
    synthesize_entity: bool,
}

impl OutlineWalker {
    /// `synthesize_entity` handles flat DOCUMENT->CODE outlines by
    /// reinserting the missing entity level, cloned from the parent.
    pub fn new(synthesize_entity: bool) -> Self {
        OutlineWalker {
            offset: None,
            synthesize_entity,
        }
    }

    /// 1-indexed physical page backing logical page 0. Meaningful once at
    /// least one leaf has been walked; defaults to the first page.
    pub fn page_base(&self) -> u32 {
        self.offset.unwrap_or(1)
    }

    pub fn walk(&mut self, nodes: &[OutlineNode]) -> Vec<Section> {
        self.walk_level(nodes, 0)
    }

    fn walk_level(&mut self, nodes: &[OutlineNode], depth: usize) -> Vec<Section> {
        // Flat outlines have no entity level; their nested bookmarks sit at
        // the analytic-code depth.
        let depth = if self.synthesize_entity && depth == 1 {
            2
        } else {
            depth
        };

        let mut sections: Vec<Section> = Vec::new();
        for node in nodes {
            match node {
                OutlineNode::Leaf(leaf) => {
                    if self.offset.is_none() {
                        self.offset = Some(leaf.page);
                        debug!(offset = leaf.page, "page numbers offset from first outline target");
                    }
                    let Some(level) = SectionLevel::from_depth(depth) else {
                        error!(
                            title = %leaf.title,
                            depth,
                            "unexpected outline structure with more than 3 levels"
                        );
                        continue;
                    };
                    let start = self.normalized_start(leaf);
                    debug!(title = %leaf.title, start, level = level.label(), "read section");
                    sections.push(Section::new(leaf.title.clone(), start, level));
                }
                OutlineNode::Container(children) => {
                    let subsections = self.walk_level(children, depth + 1);
                    if subsections.is_empty() {
                        continue;
                    }
                    let Some(parent) = sections.last_mut() else {
                        error!(depth, "outline container with no preceding bookmark, skipping");
                        continue;
                    };
                    if self.synthesize_entity && depth == 0 {
                        let mut entity = Section::new(
                            parent.title.clone(),
                            parent.start_page,
                            SectionLevel::Entity,
                        );
                        entity.children = subsections;
                        parent.children.push(entity);
                    } else {
                        parent.children.extend(subsections);
                    }
                }
            }
        }
        sections
    }

    fn normalized_start(&self, leaf: &OutlineLeaf) -> usize {
        let offset = self.offset.unwrap_or(leaf.page);
        if leaf.page < offset {
            warn!(
                title = %leaf.title,
                page = leaf.page,
                offset,
                "bookmark targets a page before the tree start, clamping to 0"
            );
            return 0;
        }
        (leaf.page - offset) as usize
    }
}
