//! Minimal HTML fragment parser and serializer
//!
//! Enough of HTML for trusted content, server-rendered markup and test
//! assertions: elements, quoted and bare attributes, comments, void elements,
//! raw-text elements and the five basic character references.

use super::{Document, NodeData, NodeId};
use crate::error::RenderError;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "title", "textarea"];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Parse `html` into detached nodes
///
/// Element namespaces follow `context`, the element the nodes will be
/// inserted into.
pub fn parse_fragment(
    doc: &mut Document,
    html: &str,
    context: Option<NodeId>,
) -> Result<Vec<NodeId>, RenderError> {
    let mut parser = Parser {
        input: html,
        pos: 0,
    };
    let mut roots = Vec::new();
    // open elements; None is the fragment itself
    let mut open: Vec<NodeId> = Vec::new();

    while !parser.at_end() {
        let parent = open.last().copied();
        let node = if parser.starts_with("<!--") {
            let text = parser.comment()?;
            Some(doc.create_comment(&text))
        } else if parser.starts_with("</") {
            let tag = parser.close_tag()?;
            if let Some(index) = open
                .iter()
                .rposition(|el| doc.tag_name(*el).is_some_and(|t| t.eq_ignore_ascii_case(&tag)))
            {
                open.truncate(index);
            }
            None
        } else if parser.starts_with("<") && parser.peek_at(1).is_some_and(|c| c.is_ascii_alphabetic())
        {
            let (tag, attributes, self_closing) = parser.open_tag()?;
            let element = doc.create_element_in(&tag, parent.or(context))?;
            for (name, value) in attributes {
                doc.set_attribute(element, &name, &value, None);
            }
            attach(doc, &mut roots, parent, element)?;
            let lower = tag.to_ascii_lowercase();
            if RAW_TEXT_ELEMENTS.contains(&lower.as_str()) {
                let raw = parser.raw_text(&lower);
                if !raw.is_empty() {
                    let text_value = if lower == "title" || lower == "textarea" {
                        decode_entities(&raw)
                    } else {
                        raw
                    };
                    let text = doc.create_text(&text_value);
                    doc.append_child(element, text)?;
                }
            } else if !self_closing && !is_void(&lower) {
                open.push(element);
            }
            None
        } else {
            let text = parser.text();
            Some(doc.create_text(&decode_entities(&text)))
        };

        if let Some(node) = node {
            attach(doc, &mut roots, parent, node)?;
        }
    }

    Ok(roots)
}

fn attach(
    doc: &mut Document,
    roots: &mut Vec<NodeId>,
    parent: Option<NodeId>,
    node: NodeId,
) -> Result<(), RenderError> {
    match parent {
        Some(parent) => doc.append_child(parent, node),
        None => {
            roots.push(node);
            Ok(())
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.rest().chars().nth(offset)
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn comment(&mut self) -> Result<String, RenderError> {
        self.pos += 4;
        let rest = self.rest();
        let end = rest
            .find("-->")
            .ok_or_else(|| RenderError::dom("unterminated comment in HTML"))?;
        let text = rest[..end].to_string();
        self.pos += end + 3;
        Ok(text)
    }

    fn name(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/' || c == '=')
            .unwrap_or(rest.len());
        self.pos += end;
        rest[..end].to_string()
    }

    fn close_tag(&mut self) -> Result<String, RenderError> {
        self.pos += 2;
        let tag = self.name();
        let rest = self.rest();
        let end = rest
            .find('>')
            .ok_or_else(|| RenderError::dom(format!("unterminated </{}>", tag)))?;
        self.pos += end + 1;
        Ok(tag)
    }

    fn open_tag(&mut self) -> Result<(String, Vec<(String, String)>, bool), RenderError> {
        self.pos += 1;
        let tag = self.name();
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace();
            if self.starts_with("/>") {
                self.pos += 2;
                return Ok((tag, attributes, true));
            }
            if self.starts_with(">") {
                self.pos += 1;
                return Ok((tag, attributes, false));
            }
            if self.at_end() {
                return Err(RenderError::dom(format!("unterminated <{}>", tag)));
            }
            let name = self.name();
            if name.is_empty() {
                // stray character such as a lone '/'
                self.pos += 1;
                continue;
            }
            self.skip_whitespace();
            let value = if self.starts_with("=") {
                self.pos += 1;
                self.skip_whitespace();
                self.attribute_value()
            } else {
                String::new()
            };
            attributes.push((name.to_ascii_lowercase(), decode_entities(&value)));
        }
    }

    fn attribute_value(&mut self) -> String {
        let rest = self.rest();
        match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let inner = &rest[1..];
                let end = inner.find(quote).unwrap_or(inner.len());
                self.pos += 1 + end + usize::from(end < inner.len());
                inner[..end].to_string()
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += end;
                rest[..end].to_string()
            }
        }
    }

    fn raw_text(&mut self, tag: &str) -> String {
        let rest = self.rest();
        let close = format!("</{}", tag);
        let end = rest
            .to_ascii_lowercase()
            .find(&close)
            .unwrap_or(rest.len());
        let text = rest[..end].to_string();
        self.pos += end;
        if !self.at_end() {
            let after = self.rest();
            self.pos += after.find('>').map(|i| i + 1).unwrap_or(after.len());
        }
        text
    }

    fn text(&mut self) -> String {
        let rest = self.rest();
        // a '<' that does not start markup is literal text
        let mut end = 0;
        loop {
            match rest[end..].find('<') {
                None => {
                    end = rest.len();
                    break;
                }
                Some(offset) => {
                    let at = end + offset;
                    let after = &rest[at + 1..];
                    let is_markup = after.starts_with('/')
                        || after.starts_with("!--")
                        || after.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
                    if is_markup && at > 0 {
                        end = at;
                        break;
                    }
                    end = at + 1;
                }
            }
        }
        self.pos += end;
        rest[..end].to_string()
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(text: &str) -> String {
    text.replace('&', "&amp;").replace('"', "&quot;")
}

/// Serialize `node`; `outer` includes the node itself
pub fn serialize(doc: &Document, node: NodeId, outer: bool) -> String {
    let mut out = String::new();
    if outer {
        write_node(doc, node, &mut out, false);
    } else {
        let raw = doc
            .tag_name(node)
            .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t) && t != "title" && t != "textarea");
        for child in doc.children(node) {
            write_node(doc, child, &mut out, raw);
        }
    }
    out
}

fn write_node(doc: &Document, node: NodeId, out: &mut String, raw: bool) {
    match doc.data(node) {
        NodeData::Document => {
            for child in doc.children(node) {
                write_node(doc, child, out, false);
            }
        }
        NodeData::Text(text) if raw => out.push_str(text),
        NodeData::Text(text) => out.push_str(&escape_text(text)),
        NodeData::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeData::Element(element) => {
            out.push('<');
            out.push_str(&element.tag);
            for attr in &element.attributes {
                out.push(' ');
                out.push_str(&attr.name);
                out.push_str("=\"");
                out.push_str(&escape_attribute(&attr.value));
                out.push('"');
            }
            out.push('>');
            if is_void(&element.tag) {
                return;
            }
            let raw_children = element.tag == "script" || element.tag == "style";
            for child in doc.children(node) {
                write_node(doc, child, out, raw_children);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn roundtrip(html: &str) -> String {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let nodes = parse_fragment(&mut doc, html, Some(div)).unwrap();
        for node in nodes {
            doc.append_child(div, node).unwrap();
        }
        doc.inner_html(div)
    }

    #[rstest]
    #[case("<p class=\"a\">hi</p>")]
    #[case("<ul><li>1</li><li>2</li></ul>")]
    #[case("<!--%+b:0%-->text<!--%-b:0%-->")]
    #[case("<input disabled=\"\"><br>after")]
    #[case("a &amp; b &lt;c&gt;")]
    #[case("<script glmr=\"x\"></script>")]
    fn test_roundtrip(#[case] html: &str) {
        assert_eq!(roundtrip(html), html);
    }

    #[test]
    fn test_bare_attributes_and_unclosed_elements() {
        assert_eq!(
            roundtrip("<input type=checkbox checked><p>open"),
            "<input type=\"checkbox\" checked=\"\"><p>open</p>"
        );
    }

    #[test]
    fn test_literal_less_than_is_text() {
        assert_eq!(roundtrip("1 < 2"), "1 &lt; 2");
    }

    #[test]
    fn test_svg_children_get_svg_namespace() {
        let mut doc = Document::new();
        let nodes = parse_fragment(&mut doc, "<svg><circle r=\"1\"/></svg>", None).unwrap();
        let circle = doc.first_child(nodes[0]).unwrap();
        assert_eq!(
            doc.element(circle).unwrap().namespace,
            crate::dom::Namespace::Svg
        );
    }
}
