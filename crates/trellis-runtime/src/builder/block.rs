//! Live blocks
//!
//! A live block tracks the first and last top-level node of a rendered
//! region as content is appended to it. When the first or last thing appended
//! is itself a nested block, the boundary points at that block rather than at
//! a node, so the outer range follows the inner one as it is rebuilt.

use crate::dom::{Bounds, Document, NodeId};
use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Node(NodeId),
    /// A range inserted in one go, such as trusted HTML
    Range(NodeId, NodeId),
    Block(BlockId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Simple,
    /// Can be cleared and rebuilt by its owning opcode
    Updatable,
    /// Rendered into an element outside the normal flow
    Remote,
    /// Bounds are derived from the item blocks, in order
    List { items: Vec<BlockId> },
}

#[derive(Debug, Clone)]
pub struct LiveBlock {
    pub parent: NodeId,
    pub kind: BlockKind,
    first: Option<Boundary>,
    last: Option<Boundary>,
    nesting: u32,
}

impl LiveBlock {
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            BlockKind::List { items } => items.is_empty(),
            _ => self.first.is_none(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BlockArena {
    blocks: Vec<LiveBlock>,
}

impl BlockArena {
    pub fn alloc(&mut self, parent: NodeId, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(LiveBlock {
            parent,
            kind,
            first: None,
            last: None,
            nesting: 0,
        });
        id
    }

    pub fn get(&self, id: BlockId) -> &LiveBlock {
        &self.blocks[id.0 as usize]
    }

    fn get_mut(&mut self, id: BlockId) -> &mut LiveBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn parent_element(&self, id: BlockId) -> NodeId {
        self.get(id).parent
    }

    pub fn first_node(&self, id: BlockId) -> Option<NodeId> {
        let block = self.get(id);
        match &block.kind {
            BlockKind::List { items } => items.first().and_then(|item| self.first_node(*item)),
            _ => match block.first? {
                Boundary::Node(node) | Boundary::Range(node, _) => Some(node),
                Boundary::Block(inner) => self.first_node(inner),
            },
        }
    }

    pub fn last_node(&self, id: BlockId) -> Option<NodeId> {
        let block = self.get(id);
        match &block.kind {
            BlockKind::List { items } => items.last().and_then(|item| self.last_node(*item)),
            _ => match block.last? {
                Boundary::Node(node) | Boundary::Range(_, node) => Some(node),
                Boundary::Block(inner) => self.last_node(inner),
            },
        }
    }

    pub fn bounds(&self, id: BlockId) -> Result<Bounds, RenderError> {
        match (self.first_node(id), self.last_node(id)) {
            (Some(first), Some(last)) => Ok(Bounds {
                parent: self.parent_element(id),
                first,
                last,
            }),
            _ => Err(RenderError::invariant(
                "cannot take the bounds of a block that is still initializing",
            )),
        }
    }

    // ===== Appending =====

    pub fn did_append_node(&mut self, id: BlockId, node: NodeId) {
        self.did_append(id, Boundary::Node(node));
    }

    pub fn did_append_range(&mut self, id: BlockId, first: NodeId, last: NodeId) {
        self.did_append(id, Boundary::Range(first, last));
    }

    pub fn did_append_block(&mut self, id: BlockId, child: BlockId) {
        self.did_append(id, Boundary::Block(child));
    }

    fn did_append(&mut self, id: BlockId, boundary: Boundary) {
        let block = self.get_mut(id);
        if matches!(block.kind, BlockKind::List { .. }) || block.nesting != 0 {
            return;
        }
        if block.first.is_none() {
            block.first = Some(boundary);
        }
        block.last = Some(boundary);
    }

    pub fn open_element(&mut self, id: BlockId, element: NodeId) {
        self.did_append_node(id, element);
        let block = self.get_mut(id);
        if !matches!(block.kind, BlockKind::List { .. }) {
            block.nesting += 1;
        }
    }

    pub fn close_element(&mut self, id: BlockId) {
        let block = self.get_mut(id);
        block.nesting = block.nesting.saturating_sub(1);
    }

    pub fn push_list_item(&mut self, list: BlockId, item: BlockId) {
        if let BlockKind::List { items } = &mut self.get_mut(list).kind {
            items.push(item);
        }
    }

    pub fn set_list_items(&mut self, list: BlockId, new_items: Vec<BlockId>) {
        if let BlockKind::List { items } = &mut self.get_mut(list).kind {
            *items = new_items;
        }
    }

    /// Clear the block's DOM and forget its contents, returning the node that
    /// followed it
    pub fn reset(&mut self, id: BlockId, document: &mut Document) -> Option<NodeId> {
        let next = match self.bounds(id) {
            Ok(bounds) => crate::dom::clear(document, bounds),
            Err(_) => None,
        };
        let block = self.get_mut(id);
        block.first = None;
        block.last = None;
        block.nesting = 0;
        next
    }

    /// Remove the block's nodes from the document
    pub fn clear(&self, id: BlockId, document: &mut Document) -> Option<NodeId> {
        self.bounds(id)
            .ok()
            .and_then(|bounds| crate::dom::clear(document, bounds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_block_boundaries_follow_inner_block() {
        let mut doc = Document::new();
        let root = doc.root();
        let mut arena = BlockArena::default();
        let outer = arena.alloc(root, BlockKind::Simple);
        let inner = arena.alloc(root, BlockKind::Updatable);

        let a = doc.create_text("a");
        arena.did_append_block(outer, inner);
        arena.did_append_node(inner, a);
        assert_eq!(arena.first_node(outer), Some(a));

        let b = doc.create_text("b");
        arena.reset(inner, &mut doc);
        arena.did_append_node(inner, b);
        assert_eq!(arena.first_node(outer), Some(b));
        assert_eq!(arena.last_node(outer), Some(b));
    }

    #[test]
    fn test_nodes_inside_open_element_are_not_boundaries() {
        let mut doc = Document::new();
        let mut arena = BlockArena::default();
        let block = arena.alloc(doc.root(), BlockKind::Simple);
        let div = doc.create_element("div");
        let text = doc.create_text("x");
        arena.open_element(block, div);
        arena.did_append_node(block, text);
        arena.close_element(block);
        assert_eq!(arena.first_node(block), Some(div));
        assert_eq!(arena.last_node(block), Some(div));
    }

    #[test]
    fn test_list_bounds_come_from_items() {
        let mut doc = Document::new();
        let mut arena = BlockArena::default();
        let list = arena.alloc(doc.root(), BlockKind::List { items: vec![] });
        assert!(arena.bounds(list).is_err());

        let first = arena.alloc(doc.root(), BlockKind::Updatable);
        let second = arena.alloc(doc.root(), BlockKind::Updatable);
        let (x, y) = (doc.create_text("x"), doc.create_text("y"));
        arena.did_append_node(first, x);
        arena.did_append_node(second, y);
        arena.set_list_items(list, vec![second, first]);
        let bounds = arena.bounds(list).unwrap();
        assert_eq!((bounds.first, bounds.last), (y, x));
    }
}
