//! Document model the VM renders into
//!
//! `Document` owns every node; the VM only holds `NodeId` handles. `Dom`
//! pairs the document with the arena of live blocks that track which ranges
//! of it belong to which updating opcode.

mod document;
pub mod html;

pub use document::{Attribute, Document, Element, Namespace, NodeData, NodeId};

use crate::builder::BlockArena;
use crate::error::RenderError;

/// A contiguous rendered range: `first..=last`, all children of `parent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub parent: NodeId,
    pub first: NodeId,
    pub last: NodeId,
}

#[derive(Debug, Default)]
pub struct Dom {
    pub document: Document,
    pub blocks: BlockArena,
}

impl Dom {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            blocks: BlockArena::default(),
        }
    }
}

/// Remove every node in `bounds`, returning the node that followed it
pub fn clear(document: &mut Document, bounds: Bounds) -> Option<NodeId> {
    let next = document.next_sibling(bounds.last);
    let mut current = Some(bounds.first);
    while let Some(node) = current {
        let after = document.next_sibling(node);
        document.remove(node);
        if node == bounds.last {
            break;
        }
        current = after;
    }
    next
}

/// Move every node in `bounds` before `reference`
pub fn move_bounds(
    document: &mut Document,
    bounds: Bounds,
    reference: Option<NodeId>,
) -> Result<(), RenderError> {
    let mut current = Some(bounds.first);
    while let Some(node) = current {
        let after = document.next_sibling(node);
        document.insert_before(bounds.parent, node, reference)?;
        if node == bounds.last {
            break;
        }
        current = after;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(doc: &mut Document, items: &[&str]) -> (NodeId, Vec<NodeId>) {
        let ul = doc.create_element("ul");
        let nodes = items
            .iter()
            .map(|text| {
                let node = doc.create_text(text);
                doc.append_child(ul, node).unwrap();
                node
            })
            .collect();
        (ul, nodes)
    }

    #[test]
    fn test_clear_returns_following_node() {
        let mut doc = Document::new();
        let (ul, nodes) = list(&mut doc, &["a", "b", "c", "d"]);
        let next = clear(
            &mut doc,
            Bounds {
                parent: ul,
                first: nodes[1],
                last: nodes[2],
            },
        );
        assert_eq!(next, Some(nodes[3]));
        assert_eq!(doc.text_content(ul), "ad");
    }

    #[test]
    fn test_move_bounds_keeps_range_order() {
        let mut doc = Document::new();
        let (ul, nodes) = list(&mut doc, &["a", "b", "c", "d"]);
        move_bounds(
            &mut doc,
            Bounds {
                parent: ul,
                first: nodes[0],
                last: nodes[1],
            },
            None,
        )
        .unwrap();
        assert_eq!(doc.text_content(ul), "cdab");
    }
}
