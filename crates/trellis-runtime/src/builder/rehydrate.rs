//! Rehydrating mode
//!
//! Walks markup produced by a serializing render and adopts it instead of
//! creating nodes. Each cursor carries a *candidate*, the next existing node
//! expected to match what the template appends. On a match the node is
//! reused (and patched when its text differs). On a mismatch everything up
//! to the end of the enclosing block is removed and rehydration is disabled
//! for that container until a matching close-block marker is reached, so the
//! remainder is built fresh.

use super::serialize::RAW_TEXT_TAGS;
use super::{BlockId, BlockKind, Cursor, ElementBuilder, RemoteInsertion};
use crate::dom::{Document, Dom, Namespace, NodeData, NodeId};
use crate::error::RenderError;
use tracing::debug;

#[derive(Debug, Default)]
pub(super) struct RehydrateState {
    pub(super) block_depth: i32,
    /// Depth of the first marker when rehydrating a subtree
    starting_block_offset: i32,
    /// Attributes of the adopted element not yet claimed by the template
    unmatched_attributes: Option<Vec<String>>,
}

impl RehydrateState {
    /// Claim an existing attribute; true when the adopted element had it
    pub(super) fn adopt_attribute(&mut self, name: &str) -> bool {
        match &mut self.unmatched_attributes {
            Some(unmatched) => match unmatched.iter().position(|n| n == name) {
                Some(i) => {
                    unmatched.remove(i);
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}

fn comment_value(document: &Document, node: NodeId) -> Option<&str> {
    match document.data(node) {
        NodeData::Comment(value) => Some(value),
        _ => None,
    }
}

fn is_open_block(document: &Document, node: NodeId) -> bool {
    comment_value(document, node).map_or(false, |v| v.starts_with("%+b:"))
}

fn is_close_block(document: &Document, node: NodeId) -> bool {
    comment_value(document, node).map_or(false, |v| v.starts_with("%-b:"))
}

fn is_marker(document: &Document, node: NodeId) -> bool {
    comment_value(document, node) == Some("%glmr%")
}

fn is_separator(document: &Document, node: NodeId) -> bool {
    comment_value(document, node) == Some("%|%")
}

fn is_empty_marker(document: &Document, node: NodeId) -> bool {
    comment_value(document, node) == Some("% %")
}

fn block_depth(document: &Document, node: NodeId) -> i32 {
    comment_value(document, node)
        .and_then(|v| v.get(4..))
        .map(|rest| rest.trim_end_matches('%'))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

/// HTML tag names compare case-insensitively, SVG ones exactly
fn is_same_node_type(document: &Document, candidate: NodeId, tag: &str) -> bool {
    match document.element(candidate) {
        Some(el) if el.namespace == Namespace::Svg => el.tag == tag,
        Some(el) => el.tag.eq_ignore_ascii_case(tag),
        None => false,
    }
}

impl ElementBuilder {
    fn candidate(&self) -> Option<NodeId> {
        self.cursor().candidate
    }

    fn set_candidate(&mut self, node: Option<NodeId>) {
        self.cursor_mut().candidate = node;
    }

    fn depth_with_offset(&self, document: &Document, node: NodeId) -> i32 {
        block_depth(document, node) - self.rehydrate.starting_block_offset
    }

    /// Locate the first open-block marker in the root container
    pub(super) fn start_rehydration(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        let document = &mut dom.document;
        let mut node = document.first_child(self.element());
        while let Some(n) = node {
            if is_open_block(document, n) {
                break;
            }
            node = document.next_sibling(n);
        }
        let node = node.ok_or_else(|| {
            RenderError::dom("rehydration requires an opening block marker in the container")
        })?;
        self.set_candidate(Some(node));

        let offset = block_depth(document, node);
        if offset != 0 {
            // A subtree render: synthesize the enclosing root block
            let depth = offset - 1;
            let parent = self.element();
            let open = document.create_comment(&format!("%+b:{}%", depth));
            document.insert_before(parent, open, Some(node))?;

            let mut closing = document.next_sibling(node);
            while let Some(c) = closing {
                if is_close_block(document, c) && block_depth(document, c) == offset {
                    break;
                }
                closing = document.next_sibling(c);
            }
            let closing = closing.ok_or_else(|| {
                RenderError::dom(format!("missing closing marker for block depth {}", offset))
            })?;
            let close = document.create_comment(&format!("%-b:{}%", depth));
            let after = document.next_sibling(closing);
            document.insert_before(parent, close, after)?;

            self.set_candidate(Some(open));
            self.rehydrate.starting_block_offset = depth;
        }
        Ok(())
    }

    pub(super) fn rehydrate_push_element(
        &mut self,
        dom: &mut Dom,
        element: NodeId,
        next_sibling: Option<NodeId>,
    ) {
        let depth = self.rehydrate.block_depth;
        let mut cursor = Cursor {
            element,
            next_sibling,
            candidate: None,
            open_block_depth: depth - 1,
            starting_block_depth: depth,
            injected_omitted_node: false,
        };
        if let Some(current) = self.cursors.last_mut() {
            if current.candidate.is_some() {
                cursor.candidate = dom.document.first_child(element);
                current.candidate = dom.document.next_sibling(element);
            }
        }
        self.cursors.push(cursor);
    }

    fn disable_rehydration(&mut self, next_sibling: Option<NodeId>) {
        let cursor = self.cursor_mut();
        cursor.next_sibling = next_sibling;
        cursor.candidate = None;
    }

    fn enable_rehydration(&mut self, candidate: Option<NodeId>) {
        let cursor = self.cursor_mut();
        cursor.candidate = candidate;
        cursor.next_sibling = None;
    }

    /// Remove nodes from `candidate` to the end of the current container,
    /// or up to the close marker of the innermost open block
    fn clear_mismatch(&mut self, dom: &mut Dom, candidate: NodeId) {
        debug!(node = candidate.index(), "rehydration mismatch");
        let document = &mut dom.document;
        let open_depth = self.cursor().open_block_depth;
        let mut current = Some(candidate);
        if open_depth >= self.cursor().starting_block_depth {
            while let Some(node) = current {
                if is_close_block(document, node)
                    && open_depth >= self.depth_with_offset(document, node)
                {
                    break;
                }
                current = document.remove(node);
            }
        } else {
            while let Some(node) = current {
                current = document.remove(node);
            }
        }
        self.disable_rehydration(current);
    }

    pub(super) fn rehydrate_begin_block(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        let depth = self.rehydrate.block_depth;
        self.rehydrate.block_depth += 1;
        let Some(candidate) = self.candidate() else {
            return Ok(());
        };
        if is_open_block(&dom.document, candidate)
            && self.depth_with_offset(&dom.document, candidate) == depth
        {
            let next = dom.document.remove(candidate);
            self.set_candidate(next);
            self.cursor_mut().open_block_depth = depth;
        } else if !RAW_TEXT_TAGS.contains(&self.element_tag(&dom.document).as_str()) {
            self.clear_mismatch(dom, candidate);
        }
        Ok(())
    }

    pub(super) fn rehydrate_end_block(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        let open_depth = self.cursor().open_block_depth;
        self.rehydrate.block_depth -= 1;

        let mut rehydrating = false;
        if let Some(candidate) = self.candidate() {
            rehydrating = true;
            if is_close_block(&dom.document, candidate)
                && self.depth_with_offset(&dom.document, candidate) == open_depth
            {
                let next = dom.document.remove(candidate);
                self.set_candidate(next);
                self.cursor_mut().open_block_depth -= 1;
            } else {
                self.clear_mismatch(dom, candidate);
                rehydrating = false;
            }
        }

        if !rehydrating {
            // resume once the close marker of this block is reached
            if let Some(next) = self.next_sibling() {
                if is_close_block(&dom.document, next)
                    && self.depth_with_offset(&dom.document, next) == self.rehydrate.block_depth
                {
                    let candidate = dom.document.remove(next);
                    self.enable_rehydration(candidate);
                    self.cursor_mut().open_block_depth -= 1;
                }
            }
        }
        Ok(())
    }

    pub(super) fn rehydrate_create_element(
        &mut self,
        dom: &mut Dom,
        tag: &str,
    ) -> Result<NodeId, RenderError> {
        if let Some(candidate) = self.candidate() {
            if is_same_node_type(&dom.document, candidate, tag) {
                self.rehydrate.unmatched_attributes = Some(
                    dom.document
                        .attributes(candidate)
                        .iter()
                        .map(|a| a.name.clone())
                        .collect(),
                );
                return Ok(candidate);
            }
            let is_tbody = dom
                .document
                .tag_name(candidate)
                .map_or(false, |t| t.eq_ignore_ascii_case("tbody"));
            if is_tbody {
                self.rehydrate_push_element(dom, candidate, None);
                self.cursor_mut().injected_omitted_node = true;
                return self.rehydrate_create_element(dom, tag);
            }
            self.clear_mismatch(dom, candidate);
        }
        self.fresh_create_element(dom, tag)
    }

    pub(super) fn rehydrate_flush(
        &mut self,
        dom: &mut Dom,
        parent: NodeId,
        element: NodeId,
    ) -> Result<(), RenderError> {
        match self.rehydrate.unmatched_attributes.take() {
            Some(unmatched) => {
                for name in unmatched {
                    dom.document.remove_attribute(element, &name);
                }
                Ok(())
            }
            None => self.fresh_flush(dom, parent, element),
        }
    }

    pub(super) fn rehydrate_will_close(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        if let Some(candidate) = self.candidate() {
            self.clear_mismatch(dom, candidate);
        }
        if self.cursor().injected_omitted_node {
            self.pop_element()?;
        }
        Ok(())
    }

    pub(super) fn rehydrate_insert_text(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        let Some(candidate) = self.candidate() else {
            return self.fresh_insert_text(dom, text);
        };
        let document = &mut dom.document;
        if document.is_text(candidate) {
            if document.node_value(candidate) != Some(text) {
                document.set_node_value(candidate, text);
            }
            let next = document.next_sibling(candidate);
            self.set_candidate(next);
            Ok(candidate)
        } else if is_separator(document, candidate) {
            let next = document.remove(candidate);
            self.set_candidate(next);
            self.rehydrate_insert_text(dom, text)
        } else if is_empty_marker(document, candidate) {
            // the server's text was empty; its marker is the slot to fill
            let next = document.remove(candidate);
            self.set_candidate(next);
            let node = document.create_text(text);
            document.insert_before(self.element(), node, next)?;
            Ok(node)
        } else {
            self.clear_mismatch(dom, candidate);
            self.fresh_insert_text(dom, text)
        }
    }

    pub(super) fn rehydrate_insert_comment(
        &mut self,
        dom: &mut Dom,
        text: &str,
    ) -> Result<NodeId, RenderError> {
        if let Some(candidate) = self.candidate() {
            if dom.document.is_comment(candidate) {
                if dom.document.node_value(candidate) != Some(text) {
                    dom.document.set_node_value(candidate, text);
                }
                let next = dom.document.next_sibling(candidate);
                self.set_candidate(next);
                return Ok(candidate);
            }
            self.clear_mismatch(dom, candidate);
        }
        self.fresh_insert_comment(dom, text)
    }

    pub(super) fn rehydrate_insert_node(&mut self, dom: &mut Dom, node: NodeId) -> Result<NodeId, RenderError> {
        match self.candidate() {
            Some(candidate) => Ok(candidate),
            None => self.fresh_insert_node(dom, node),
        }
    }

    /// Adopt the nodes between a pair of `%glmr%` markers
    pub(super) fn rehydrate_insert_html(
        &mut self,
        dom: &mut Dom,
        html: &str,
    ) -> Result<(NodeId, NodeId), RenderError> {
        if let Some(first) = self.candidate().filter(|c| is_marker(&dom.document, *c)) {
            let document = &mut dom.document;
            let mut last = document.next_sibling(first);
            while let Some(l) = last {
                if is_marker(document, l) {
                    break;
                }
                last = document.next_sibling(l);
            }
            if let Some(last) = last {
                let inner = (document.next_sibling(first), document.prev_sibling(last));
                if let (Some(start), Some(end)) = inner {
                    if start != last {
                        document.remove(first);
                        document.remove(last);
                        if start == end && is_empty_marker(document, start) {
                            // empty markup renders as an empty comment
                            document.set_node_value(start, "");
                        }
                        return Ok((start, end));
                    }
                }
            }
            self.clear_mismatch(dom, first);
        }
        self.fresh_insert_html(dom, html)
    }

    pub(super) fn rehydrate_push_remote(
        &mut self,
        dom: &mut Dom,
        element: NodeId,
        guid: &str,
        insertion: RemoteInsertion,
    ) -> Result<BlockId, RenderError> {
        let document = &mut dom.document;
        let marker = document
            .find_descendant(element, &|d: &Document, n: NodeId| {
                d.tag_name(n) == Some("script") && d.get_attribute(n, "glmr") == Some(guid)
            })
            .filter(|m| document.parent(*m) == Some(element));

        let insert_before = match insertion {
            RemoteInsertion::Replace => {
                while let Some(child) = document.first_child(element) {
                    if Some(child) == marker {
                        break;
                    }
                    document.remove(child);
                }
                None
            }
            RemoteInsertion::Before(next) => next,
        };

        let depth = self.rehydrate.block_depth;
        self.cursors.push(Cursor {
            element,
            next_sibling: None,
            candidate: None,
            open_block_depth: depth - 1,
            starting_block_depth: depth,
            injected_omitted_node: false,
        });
        match marker {
            Some(marker) => {
                let next = dom.document.remove(marker);
                self.set_candidate(next);
            }
            None => self.disable_rehydration(insert_before),
        }
        let block = dom.blocks.alloc(element, BlockKind::Remote);
        self.push_live_block(dom, block, true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BuilderMode, CursorPosition};
    use super::*;
    use crate::dom::html::parse_fragment;

    fn container(dom: &mut Dom, markup: &str) -> NodeId {
        let div = dom.document.create_element("div");
        for node in parse_fragment(&mut dom.document, markup, Some(div)).unwrap() {
            dom.document.append_child(div, node).unwrap();
        }
        div
    }

    fn rehydrator(dom: &mut Dom, element: NodeId) -> ElementBuilder {
        ElementBuilder::for_initial_render(
            dom,
            BuilderMode::Rehydrate,
            CursorPosition {
                element,
                next_sibling: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_matching_markup_is_adopted() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<!--%+b:0%--><p class=\"x\">hi</p><!--%-b:0%-->");
        let p = dom.document.first_child(div).and_then(|n| dom.document.next_sibling(n)).unwrap();

        let mut builder = rehydrator(&mut dom, div);
        let adopted = builder.open_element(&mut dom, "p").unwrap();
        builder.set_static_attribute(&mut dom, "class", "x", None).unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.append_text(&mut dom, "hi").unwrap();
        builder.close_element(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();

        assert_eq!(adopted, p);
        assert_eq!(dom.document.inner_html(div), "<p class=\"x\">hi</p>");
    }

    #[test]
    fn test_text_is_patched_and_stale_attributes_removed() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<!--%+b:0%--><p title=\"old\">before</p><!--%-b:0%-->");
        let mut builder = rehydrator(&mut dom, div);
        builder.open_element(&mut dom, "p").unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.append_text(&mut dom, "after").unwrap();
        builder.close_element(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.inner_html(div), "<p>after</p>");
    }

    #[test]
    fn test_mismatch_clears_and_builds_fresh() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<!--%+b:0%--><span>a</span><em>b</em><!--%-b:0%-->");
        let mut builder = rehydrator(&mut dom, div);
        builder.open_element(&mut dom, "section").unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.close_element(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.inner_html(div), "<section></section>");
    }

    #[test]
    fn test_separators_and_empty_text() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<!--%+b:0%-->a<!--%|%-->b<!--% %--><!--%-b:0%-->");
        let mut builder = rehydrator(&mut dom, div);
        builder.append_text(&mut dom, "a").unwrap();
        builder.append_text(&mut dom, "b").unwrap();
        builder.append_text(&mut dom, "").unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.children(div).len(), 3);
        assert_eq!(dom.document.text_content(div), "ab");
    }

    #[test]
    fn test_empty_marker_takes_new_text_in_place() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<!--%+b:0%--><!--% %--><span>kept</span><!--%-b:0%-->");
        let span = dom.document.children(div)[2];

        let mut builder = rehydrator(&mut dom, div);
        builder.append_text(&mut dom, "now").unwrap();
        let adopted = builder.open_element(&mut dom, "span").unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.append_text(&mut dom, "kept").unwrap();
        builder.close_element(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();

        assert_eq!(adopted, span);
        assert_eq!(dom.document.inner_html(div), "now<span>kept</span>");
    }

    #[test]
    fn test_trusted_html_markers_are_removed() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<!--%+b:0%--><!--%glmr%--><b>x</b><!--%glmr%--><!--%-b:0%-->");
        let mut builder = rehydrator(&mut dom, div);
        builder.append_dynamic_html(&mut dom, "<b>x</b>").unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.inner_html(div), "<b>x</b>");
    }

    #[test]
    fn test_missing_open_marker_is_an_error() {
        let mut dom = Dom::default();
        let div = container(&mut dom, "<p></p>");
        let result = ElementBuilder::for_initial_render(
            &mut dom,
            BuilderMode::Rehydrate,
            CursorPosition {
                element: div,
                next_sibling: None,
            },
        );
        assert!(matches!(result, Err(RenderError::Dom { .. })));
    }
}
