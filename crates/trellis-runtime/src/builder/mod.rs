//! Element builder
//!
//! The builder tracks where the next node goes: a stack of cursors (element
//! plus the sibling to insert before) and a stack of live blocks recording
//! what each region appended. All insertion goes through a small set of
//! hooks, which the serializing and rehydrating modes override:
//!
//! - serializing adds the comment markers rehydration needs
//! - rehydrating adopts existing nodes where they match and clears the rest

mod block;
mod rehydrate;
mod serialize;

pub use block::*;

use crate::attributes::{AttributeWrite, DynamicAttribute};
use crate::dom::{Document, Dom, NodeId};
use crate::error::RenderError;
use crate::modifier::ModifierInstance;
use crate::value::Value;
use rehydrate::RehydrateState;
use serialize::SerializeState;
use std::rc::Rc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderMode {
    /// Build into an empty container
    #[default]
    Fresh,
    /// Build markup that can later be rehydrated
    Serialize,
    /// Adopt markup produced by a serializing render
    Rehydrate,
}

/// Where a render starts: inside `element`, before `next_sibling`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    pub element: NodeId,
    pub next_sibling: Option<NodeId>,
}

/// How a remote element's existing content is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteInsertion {
    /// Remove the element's children first, then append
    Replace,
    /// Keep existing children and insert before the given node
    Before(Option<NodeId>),
}

#[derive(Debug, Clone)]
struct Cursor {
    element: NodeId,
    next_sibling: Option<NodeId>,
    /// Next existing node to try to adopt while rehydrating
    candidate: Option<NodeId>,
    open_block_depth: i32,
    starting_block_depth: i32,
    /// Cursor pushed for a `<tbody>` the markup has but the template omits
    injected_omitted_node: bool,
}

pub struct ElementBuilder {
    mode: BuilderMode,
    /// Never empty once constructed
    cursors: Vec<Cursor>,
    blocks: Vec<BlockId>,
    constructing: Option<NodeId>,
    /// Modifiers added to the element under construction
    operations: Vec<ModifierInstance>,
    modifier_stack: Vec<Vec<ModifierInstance>>,
    serialize: SerializeState,
    rehydrate: RehydrateState,
}

impl ElementBuilder {
    fn empty(mode: BuilderMode) -> Self {
        Self {
            mode,
            cursors: Vec::new(),
            blocks: Vec::new(),
            constructing: None,
            operations: Vec::new(),
            modifier_stack: Vec::new(),
            serialize: SerializeState::default(),
            rehydrate: RehydrateState::default(),
        }
    }

    /// A builder positioned at `position` with a root block open
    pub fn for_initial_render(
        dom: &mut Dom,
        mode: BuilderMode,
        position: CursorPosition,
    ) -> Result<Self, RenderError> {
        let mut builder = Self::empty(mode);
        builder.push_element(dom, position.element, position.next_sibling);
        if mode == BuilderMode::Rehydrate {
            builder.start_rehydration(dom)?;
        }
        builder.push_simple_block(dom)?;
        Ok(builder)
    }

    /// A builder that rebuilds `block` in place
    pub fn resume(dom: &mut Dom, block: BlockId) -> Result<Self, RenderError> {
        let parent = dom.blocks.parent_element(block);
        let next = dom.blocks.reset(block, &mut dom.document);
        let mut builder = Self::empty(BuilderMode::Fresh);
        builder.push_element(dom, parent, next);
        builder.push_simple_block(dom)?;
        builder.push_live_block(dom, block, false)?;
        Ok(builder)
    }

    pub fn mode(&self) -> BuilderMode {
        self.mode
    }

    fn cursor(&self) -> &Cursor {
        &self.cursors[self.cursors.len() - 1]
    }

    fn cursor_mut(&mut self) -> &mut Cursor {
        let last = self.cursors.len() - 1;
        &mut self.cursors[last]
    }

    pub fn element(&self) -> NodeId {
        self.cursor().element
    }

    pub fn next_sibling(&self) -> Option<NodeId> {
        self.cursor().next_sibling
    }

    pub fn constructing(&self) -> Result<NodeId, RenderError> {
        self.constructing
            .ok_or_else(|| RenderError::invariant("no element is being constructed"))
    }

    pub fn block(&self) -> Result<BlockId, RenderError> {
        self.blocks
            .last()
            .copied()
            .ok_or_else(|| RenderError::invariant("no live block is open"))
    }

    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }

    fn element_tag(&self, document: &Document) -> String {
        document
            .tag_name(self.element())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default()
    }

    fn push_element(&mut self, dom: &mut Dom, element: NodeId, next_sibling: Option<NodeId>) {
        if self.mode == BuilderMode::Rehydrate {
            self.rehydrate_push_element(dom, element, next_sibling);
        } else {
            let depth = self.rehydrate.block_depth;
            self.cursors.push(Cursor {
                element,
                next_sibling,
                candidate: None,
                open_block_depth: depth - 1,
                starting_block_depth: depth,
                injected_omitted_node: false,
            });
        }
    }

    fn pop_element(&mut self) -> Result<(), RenderError> {
        if self.cursors.len() <= 1 {
            return Err(RenderError::invariant("cannot pop the root cursor"));
        }
        self.cursors.pop();
        Ok(())
    }

    // ===== Blocks =====

    pub fn push_simple_block(&mut self, dom: &mut Dom) -> Result<BlockId, RenderError> {
        let block = dom.blocks.alloc(self.element(), BlockKind::Simple);
        self.push_live_block(dom, block, false)
    }

    pub fn push_updatable_block(&mut self, dom: &mut Dom) -> Result<BlockId, RenderError> {
        let block = dom.blocks.alloc(self.element(), BlockKind::Updatable);
        self.push_live_block(dom, block, false)
    }

    pub fn push_block_list(&mut self, dom: &mut Dom) -> Result<BlockId, RenderError> {
        let block = dom
            .blocks
            .alloc(self.element(), BlockKind::List { items: Vec::new() });
        self.push_live_block(dom, block, false)
    }

    pub fn push_live_block(
        &mut self,
        dom: &mut Dom,
        block: BlockId,
        is_remote: bool,
    ) -> Result<BlockId, RenderError> {
        if let Some(&current) = self.blocks.last() {
            if !is_remote {
                dom.blocks.did_append_block(current, block);
            }
        }
        self.begin_block(dom)?;
        self.blocks.push(block);
        trace!(?block, depth = self.blocks.len(), "push block");
        Ok(block)
    }

    pub fn pop_block(&mut self, dom: &mut Dom) -> Result<BlockId, RenderError> {
        let block = self.block()?;
        let live = dom.blocks.get(block);
        if !matches!(live.kind, BlockKind::List { .. }) && live.is_empty() {
            self.append_comment(dom, "")?;
        }
        self.end_block(dom)?;
        self.blocks.pop();
        trace!(?block, depth = self.blocks.len(), "pop block");
        Ok(block)
    }

    /// Close every open block after a failed render
    pub fn close_all_blocks(&mut self, dom: &mut Dom) {
        while self.has_blocks() {
            if self.pop_block(dom).is_err() {
                self.blocks.pop();
            }
        }
    }

    fn begin_block(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        match self.mode {
            BuilderMode::Fresh => Ok(()),
            BuilderMode::Serialize => self.serialize_begin_block(dom),
            BuilderMode::Rehydrate => self.rehydrate_begin_block(dom),
        }
    }

    fn end_block(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        match self.mode {
            BuilderMode::Fresh => Ok(()),
            BuilderMode::Serialize => self.serialize_end_block(dom),
            BuilderMode::Rehydrate => self.rehydrate_end_block(dom),
        }
    }

    // ===== Elements =====

    pub fn open_element(&mut self, dom: &mut Dom, tag: &str) -> Result<NodeId, RenderError> {
        if self.mode == BuilderMode::Serialize {
            self.serialize_before_open(dom, tag)?;
        }
        let element = match self.mode {
            BuilderMode::Rehydrate => self.rehydrate_create_element(dom, tag)?,
            _ => self.fresh_create_element(dom, tag)?,
        };
        self.constructing = Some(element);
        Ok(element)
    }

    pub fn add_modifier(&mut self, modifier: ModifierInstance) {
        self.operations.push(modifier);
    }

    pub fn flush_element(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        let parent = self.element();
        let element = self.constructing()?;
        match self.mode {
            BuilderMode::Rehydrate => self.rehydrate_flush(dom, parent, element)?,
            _ => self.fresh_flush(dom, parent, element)?,
        }
        self.constructing = None;
        let modifiers = std::mem::take(&mut self.operations);
        self.modifier_stack.push(modifiers);
        self.push_element(dom, element, None);
        dom.blocks.open_element(self.block()?, element);
        Ok(())
    }

    /// Close the current element, returning the modifiers to install on it
    pub fn close_element(&mut self, dom: &mut Dom) -> Result<Vec<ModifierInstance>, RenderError> {
        if self.mode == BuilderMode::Serialize && self.serialize.take_extra_close(self.element()) {
            self.close_element_inner(dom)?;
        }
        self.close_element_inner(dom)
    }

    fn close_element_inner(&mut self, dom: &mut Dom) -> Result<Vec<ModifierInstance>, RenderError> {
        if self.mode == BuilderMode::Rehydrate {
            self.rehydrate_will_close(dom)?;
        }
        dom.blocks.close_element(self.block()?);
        self.pop_element()?;
        Ok(self.modifier_stack.pop().unwrap_or_default())
    }

    pub fn push_remote_element(
        &mut self,
        dom: &mut Dom,
        element: NodeId,
        guid: &str,
        insertion: RemoteInsertion,
    ) -> Result<BlockId, RenderError> {
        match self.mode {
            BuilderMode::Fresh => self.fresh_push_remote(dom, element, insertion),
            BuilderMode::Serialize => {
                // existing content is kept so the marker survives
                let before = match insertion {
                    RemoteInsertion::Replace => None,
                    RemoteInsertion::Before(next) => next,
                };
                self.serialize_remote_marker(dom, element, guid, before)?;
                self.fresh_push_remote(dom, element, RemoteInsertion::Before(before))
            }
            BuilderMode::Rehydrate => self.rehydrate_push_remote(dom, element, guid, insertion),
        }
    }

    pub fn pop_remote_element(&mut self, dom: &mut Dom) -> Result<BlockId, RenderError> {
        let block = self.pop_block(dom)?;
        self.pop_element()?;
        Ok(block)
    }

    // ===== Content =====

    pub fn append_text(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        let node = self.insert_text(dom, text)?;
        dom.blocks.did_append_node(self.block()?, node);
        Ok(node)
    }

    pub fn append_comment(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        let node = self.insert_comment(dom, text)?;
        dom.blocks.did_append_node(self.block()?, node);
        Ok(node)
    }

    /// Append text from a reference; returns the node to update later
    pub fn append_dynamic_text(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        self.append_text(dom, text)
    }

    /// Append trusted markup
    pub fn append_dynamic_html(&mut self, dom: &mut Dom, html: &str) -> Result<(), RenderError> {
        let (first, last) = self.insert_html(dom, html)?;
        self.did_append_bounds(dom, first, last)
    }

    pub fn append_dynamic_node(&mut self, dom: &mut Dom, node: NodeId) -> Result<(), RenderError> {
        let node = match self.mode {
            BuilderMode::Rehydrate => self.rehydrate_insert_node(dom, node)?,
            _ => self.fresh_insert_node(dom, node)?,
        };
        self.did_append_bounds(dom, node, node)
    }

    fn did_append_bounds(&mut self, dom: &mut Dom, first: NodeId, last: NodeId) -> Result<(), RenderError> {
        dom.blocks.did_append_range(self.block()?, first, last);
        if self.mode == BuilderMode::Rehydrate && self.cursor().candidate.is_some() {
            self.cursor_mut().candidate = dom.document.next_sibling(last);
        }
        Ok(())
    }

    fn insert_text(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        match self.mode {
            BuilderMode::Fresh => self.fresh_insert_text(dom, text),
            BuilderMode::Serialize => self.serialize_insert_text(dom, text),
            BuilderMode::Rehydrate => self.rehydrate_insert_text(dom, text),
        }
    }

    fn insert_comment(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        match self.mode {
            BuilderMode::Rehydrate => self.rehydrate_insert_comment(dom, text),
            _ => self.fresh_insert_comment(dom, text),
        }
    }

    fn insert_html(&mut self, dom: &mut Dom, html: &str) -> Result<(NodeId, NodeId), RenderError> {
        match self.mode {
            BuilderMode::Fresh => self.fresh_insert_html(dom, html),
            BuilderMode::Serialize => self.serialize_insert_html(dom, html),
            BuilderMode::Rehydrate => self.rehydrate_insert_html(dom, html),
        }
    }

    // ===== Attributes =====

    pub fn set_static_attribute(
        &mut self,
        dom: &mut Dom,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) -> Result<(), RenderError> {
        let element = self.constructing()?;
        self.write_attribute(dom, element, name, value, namespace);
        Ok(())
    }

    /// Classify and set an attribute whose value can change
    pub fn set_dynamic_attribute(
        &mut self,
        dom: &mut Dom,
        name: &str,
        value: &Value,
        trusting: bool,
        namespace: Option<Rc<str>>,
    ) -> Result<DynamicAttribute, RenderError> {
        let element = self.constructing()?;
        let mut attribute = DynamicAttribute::new(
            &dom.document,
            element,
            name,
            namespace,
            trusting,
            self.mode == BuilderMode::Serialize,
        );
        match attribute.initial(value) {
            Some(AttributeWrite::Attribute {
                name,
                value,
                namespace,
            }) => self.write_attribute(dom, element, &name, &value, namespace.as_deref()),
            Some(AttributeWrite::Property { name, value }) => {
                self.write_property(dom, element, &name, value)
            }
            None => {}
        }
        Ok(attribute)
    }

    fn write_attribute(
        &mut self,
        dom: &mut Dom,
        element: NodeId,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) {
        if self.mode == BuilderMode::Rehydrate {
            self.rehydrate.adopt_attribute(name);
        }
        if dom.document.get_attribute(element, name) != Some(value) {
            dom.document.set_attribute(element, name, value, namespace);
        }
    }

    fn write_property(&mut self, dom: &mut Dom, element: NodeId, name: &str, value: Value) {
        if self.mode == BuilderMode::Rehydrate && self.rehydrate.adopt_attribute(name) {
            let text = value.to_text();
            if dom.document.get_attribute(element, name) != Some(text.as_str()) {
                dom.document.set_attribute(element, name, &text, None);
            }
            return;
        }
        dom.document.set_property(element, name, value);
    }

    // ===== Plain insertion =====

    fn fresh_create_element(&mut self, dom: &mut Dom, tag: &str) -> Result<NodeId, RenderError> {
        dom.document.create_element_in(tag, Some(self.element()))
    }

    fn fresh_flush(&mut self, dom: &mut Dom, parent: NodeId, element: NodeId) -> Result<(), RenderError> {
        dom.document
            .insert_before(parent, element, self.next_sibling())
    }

    fn fresh_push_remote(
        &mut self,
        dom: &mut Dom,
        element: NodeId,
        insertion: RemoteInsertion,
    ) -> Result<BlockId, RenderError> {
        let next = match insertion {
            RemoteInsertion::Replace => {
                while let Some(child) = dom.document.last_child(element) {
                    dom.document.remove(child);
                }
                None
            }
            RemoteInsertion::Before(next) => next,
        };
        self.push_element(dom, element, next);
        let block = dom.blocks.alloc(element, BlockKind::Remote);
        self.push_live_block(dom, block, true)
    }

    fn fresh_insert_text(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        let node = dom.document.create_text(text);
        dom.document
            .insert_before(self.element(), node, self.next_sibling())?;
        Ok(node)
    }

    fn fresh_insert_comment(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        let node = dom.document.create_comment(text);
        dom.document
            .insert_before(self.element(), node, self.next_sibling())?;
        Ok(node)
    }

    fn fresh_insert_node(&mut self, dom: &mut Dom, node: NodeId) -> Result<NodeId, RenderError> {
        dom.document
            .insert_before(self.element(), node, self.next_sibling())?;
        Ok(node)
    }

    fn fresh_insert_html(&mut self, dom: &mut Dom, html: &str) -> Result<(NodeId, NodeId), RenderError> {
        dom.document
            .insert_html_before(self.element(), self.next_sibling(), html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(dom: &mut Dom) -> (ElementBuilder, NodeId) {
        let body = dom.document.create_element("body");
        let root = dom.document.root();
        dom.document.append_child(root, body).unwrap();
        let builder = ElementBuilder::for_initial_render(
            dom,
            BuilderMode::Fresh,
            CursorPosition {
                element: body,
                next_sibling: None,
            },
        )
        .unwrap();
        (builder, body)
    }

    #[test]
    fn test_elements_and_text() {
        let mut dom = Dom::default();
        let (mut builder, body) = fresh(&mut dom);
        builder.open_element(&mut dom, "p").unwrap();
        builder
            .set_static_attribute(&mut dom, "class", "lead", None)
            .unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.append_text(&mut dom, "hello").unwrap();
        builder.close_element(&mut dom).unwrap();
        let root = builder.pop_block(&mut dom).unwrap();

        assert_eq!(dom.document.inner_html(body), "<p class=\"lead\">hello</p>");
        let bounds = dom.blocks.bounds(root).unwrap();
        assert_eq!(bounds.first, bounds.last);
    }

    #[test]
    fn test_empty_block_gets_a_placeholder_comment() {
        let mut dom = Dom::default();
        let (mut builder, body) = fresh(&mut dom);
        let inner = builder.push_updatable_block(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.inner_html(body), "<!---->");
        assert!(dom.blocks.first_node(inner).is_some());
    }

    #[test]
    fn test_resume_rebuilds_in_place() {
        let mut dom = Dom::default();
        let (mut builder, body) = fresh(&mut dom);
        builder.append_text(&mut dom, "a").unwrap();
        let middle = builder.push_updatable_block(&mut dom).unwrap();
        builder.append_text(&mut dom, "old").unwrap();
        builder.pop_block(&mut dom).unwrap();
        builder.append_text(&mut dom, "z").unwrap();
        builder.pop_block(&mut dom).unwrap();

        let mut resumed = ElementBuilder::resume(&mut dom, middle).unwrap();
        resumed.append_text(&mut dom, "new").unwrap();
        resumed.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.text_content(body), "anewz");
    }

    #[test]
    fn test_remote_replace_clears_target() {
        let mut dom = Dom::default();
        let (mut builder, _body) = fresh(&mut dom);
        let target = dom.document.create_element("div");
        let stale = dom.document.create_text("stale");
        dom.document.append_child(target, stale).unwrap();

        builder
            .push_remote_element(&mut dom, target, "r1", RemoteInsertion::Replace)
            .unwrap();
        builder.append_text(&mut dom, "portal").unwrap();
        builder.pop_remote_element(&mut dom).unwrap();
        assert_eq!(dom.document.inner_html(target), "portal");
    }

    #[test]
    fn test_modifiers_are_returned_on_close() {
        let mut dom = Dom::default();
        let (mut builder, _) = fresh(&mut dom);
        builder.open_element(&mut dom, "div").unwrap();
        builder.flush_element(&mut dom).unwrap();
        assert!(builder.close_element(&mut dom).unwrap().is_empty());
        assert!(builder.close_element(&mut dom).is_err());
    }
}
