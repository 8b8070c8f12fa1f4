//! Serializing mode
//!
//! Markup rendered for later rehydration carries comment markers:
//!
//! ```text
//! <!--%+b:N%-->  <!--%-b:N%-->   open/close of a block at depth N
//! <!--%glmr%-->                  brackets trusted HTML
//! <!--% %-->                     an empty text node
//! <!--%|%-->                     separates adjacent text nodes
//! <script glmr="id"></script>    position of an in-element region
//! ```
//!
//! No markers are written inside `title`, `script` or `style`, whose
//! contents are raw text.

use super::ElementBuilder;
use crate::dom::{Dom, NodeId};
use crate::error::RenderError;
use std::collections::HashSet;

pub(super) const RAW_TEXT_TAGS: &[&str] = &["title", "script", "style"];

#[derive(Debug, Default)]
pub(super) struct SerializeState {
    depth: u32,
    /// `<tbody>` elements opened implicitly for a `<tr>`
    extra_close: HashSet<NodeId>,
}

impl SerializeState {
    pub(super) fn take_extra_close(&mut self, element: NodeId) -> bool {
        self.extra_close.remove(&element)
    }
}

impl ElementBuilder {
    fn in_raw_text(&self, dom: &Dom) -> bool {
        RAW_TEXT_TAGS.contains(&self.element_tag(&dom.document).as_str())
    }

    pub(super) fn serialize_begin_block(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        if !self.in_raw_text(dom) {
            let depth = self.serialize.depth;
            self.serialize.depth += 1;
            self.fresh_insert_comment(dom, &format!("%+b:{}%", depth))?;
        }
        Ok(())
    }

    pub(super) fn serialize_end_block(&mut self, dom: &mut Dom) -> Result<(), RenderError> {
        if !self.in_raw_text(dom) {
            self.serialize.depth = self.serialize.depth.saturating_sub(1);
            let depth = self.serialize.depth;
            self.fresh_insert_comment(dom, &format!("%-b:{}%", depth))?;
        }
        Ok(())
    }

    /// Browsers put a `<tr>` outside a table section into an implicit
    /// `<tbody>`; emit it explicitly so the client sees the same tree
    pub(super) fn serialize_before_open(&mut self, dom: &mut Dom, tag: &str) -> Result<(), RenderError> {
        if tag != "tr" {
            return Ok(());
        }
        let parent = self.element_tag(&dom.document);
        if !matches!(parent.as_str(), "tbody" | "thead" | "tfoot") {
            let tbody = self.fresh_create_element(dom, "tbody")?;
            self.constructing = Some(tbody);
            self.serialize.extra_close.insert(tbody);
            self.flush_element(dom)?;
        }
        Ok(())
    }

    pub(super) fn serialize_insert_text(&mut self, dom: &mut Dom, text: &str) -> Result<NodeId, RenderError> {
        if self.in_raw_text(dom) {
            return self.fresh_insert_text(dom, text);
        }
        if text.is_empty() {
            return self.fresh_insert_comment(dom, "% %");
        }
        let previous = match self.next_sibling() {
            Some(next) => dom.document.prev_sibling(next),
            None => dom.document.last_child(self.element()),
        };
        if previous.map_or(false, |node| dom.document.is_text(node)) {
            self.fresh_insert_comment(dom, "%|%")?;
        }
        self.fresh_insert_text(dom, text)
    }

    pub(super) fn serialize_insert_html(
        &mut self,
        dom: &mut Dom,
        html: &str,
    ) -> Result<(NodeId, NodeId), RenderError> {
        if self.in_raw_text(dom) {
            return self.fresh_insert_html(dom, html);
        }
        let first = self.fresh_insert_comment(dom, "%glmr%")?;
        let wrapped;
        let mut html = html;
        if self.element_tag(&dom.document) == "table" {
            if let Some(open) = html.find('<') {
                if html[open + 1..].starts_with("tr") {
                    wrapped = format!("<tbody>{}</tbody>", html);
                    html = &wrapped;
                }
            }
        }
        if html.is_empty() {
            self.fresh_insert_comment(dom, "% %")?;
        } else {
            self.fresh_insert_html(dom, html)?;
        }
        let last = self.fresh_insert_comment(dom, "%glmr%")?;
        Ok((first, last))
    }

    pub(super) fn serialize_remote_marker(
        &mut self,
        dom: &mut Dom,
        element: NodeId,
        guid: &str,
        before: Option<NodeId>,
    ) -> Result<(), RenderError> {
        let script = dom.document.create_element("script");
        dom.document.set_attribute(script, "glmr", guid, None);
        dom.document.insert_before(element, script, before)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BlockId, BuilderMode, CursorPosition, RemoteInsertion};
    use super::*;
    use crate::dom::Dom;

    fn serializer(dom: &mut Dom, tag: &str) -> (ElementBuilder, NodeId) {
        let container = dom.document.create_element(tag);
        let builder = ElementBuilder::for_initial_render(
            dom,
            BuilderMode::Serialize,
            CursorPosition {
                element: container,
                next_sibling: None,
            },
        )
        .unwrap();
        (builder, container)
    }

    #[test]
    fn test_blocks_and_adjacent_text_are_marked() {
        let mut dom = Dom::default();
        let (mut builder, container) = serializer(&mut dom, "div");
        builder.append_text(&mut dom, "a").unwrap();
        builder.append_text(&mut dom, "b").unwrap();
        builder.append_text(&mut dom, "").unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(
            dom.document.inner_html(container),
            "<!--%+b:0%-->a<!--%|%-->b<!--% %--><!--%-b:0%-->"
        );
    }

    #[test]
    fn test_trusted_html_is_bracketed() {
        let mut dom = Dom::default();
        let (mut builder, container) = serializer(&mut dom, "div");
        builder.append_dynamic_html(&mut dom, "<b>x</b>").unwrap();
        builder.append_dynamic_html(&mut dom, "").unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(
            dom.document.inner_html(container),
            "<!--%+b:0%--><!--%glmr%--><b>x</b><!--%glmr%--><!--%glmr%--><!--% %--><!--%glmr%--><!--%-b:0%-->"
        );
    }

    #[test]
    fn test_raw_text_elements_get_no_markers() {
        let mut dom = Dom::default();
        let (mut builder, container) = serializer(&mut dom, "title");
        builder.append_text(&mut dom, "a").unwrap();
        builder.append_text(&mut dom, "b").unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(dom.document.inner_html(container), "ab");
    }

    #[test]
    fn test_table_rows_get_a_tbody() {
        let mut dom = Dom::default();
        let (mut builder, container) = serializer(&mut dom, "div");
        builder.open_element(&mut dom, "table").unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.open_element(&mut dom, "tr").unwrap();
        builder.flush_element(&mut dom).unwrap();
        builder.close_element(&mut dom).unwrap();
        builder.close_element(&mut dom).unwrap();
        builder.pop_block(&mut dom).unwrap();
        assert_eq!(
            dom.document.inner_html(container),
            "<!--%+b:0%--><table><tbody><tr></tr></tbody></table><!--%-b:0%-->"
        );
    }

    #[test]
    fn test_remote_marker_precedes_content() {
        let mut dom = Dom::default();
        let (mut builder, _) = serializer(&mut dom, "div");
        let target = dom.document.create_element("aside");
        let block: BlockId = builder
            .push_remote_element(&mut dom, target, "7", RemoteInsertion::Replace)
            .unwrap();
        builder.append_text(&mut dom, "x").unwrap();
        assert_eq!(builder.pop_remote_element(&mut dom).unwrap(), block);
        assert_eq!(
            dom.document.inner_html(target),
            "<script glmr=\"7\"></script><!--%+b:1%-->x<!--%-b:1%-->"
        );
    }
}
