//! Arena-backed document
//!
//! Nodes are addressed by `NodeId` and never freed; removing a node only
//! detaches it. Every structural change, attribute write, property write and
//! character-data write bumps a mutation counter, which tests use the way a
//! browser test would use a `MutationObserver`.

use crate::error::RenderError;
use crate::value::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Html,
    Svg,
}

impl Namespace {
    pub fn uri(self) -> &'static str {
        match self {
            Namespace::Html => "http://www.w3.org/1999/xhtml",
            Namespace::Svg => "http://www.w3.org/2000/svg",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Element {
    pub tag: String,
    pub namespace: Namespace,
    pub attributes: Vec<Attribute>,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct NodeSlot {
    data: NodeData,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

/// Elements that may host HTML content inside SVG
const SVG_INTEGRATION_POINTS: &[&str] = &["foreignObject", "desc", "title"];

/// HTML elements that cannot be created inside an SVG context
const SVG_BLACKLIST: &[&str] = &[
    "b",
    "big",
    "blockquote",
    "body",
    "br",
    "center",
    "code",
    "dd",
    "div",
    "dl",
    "dt",
    "em",
    "embed",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "head",
    "hr",
    "i",
    "img",
    "li",
    "listing",
    "main",
    "meta",
    "nobr",
    "ol",
    "p",
    "pre",
    "ruby",
    "s",
    "small",
    "span",
    "strong",
    "strike",
    "sub",
    "sup",
    "table",
    "tt",
    "u",
    "ul",
    "var",
];

#[derive(Debug)]
pub struct Document {
    nodes: Vec<NodeSlot>,
    root: NodeId,
    mutations: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
            mutations: 0,
        };
        doc.root = doc.alloc(NodeData::Document);
        doc
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeSlot {
            data,
            parent: None,
            first_child: None,
            last_child: None,
            prev: None,
            next: None,
        });
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of observable mutations performed so far
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    // ===== Creation =====

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.create_element_ns(Namespace::Html, tag)
    }

    pub fn create_element_ns(&mut self, namespace: Namespace, tag: &str) -> NodeId {
        let tag = match namespace {
            Namespace::Html => tag.to_ascii_lowercase(),
            Namespace::Svg => tag.to_string(),
        };
        self.alloc(NodeData::Element(Element {
            tag,
            namespace,
            attributes: Vec::new(),
            properties: BTreeMap::new(),
        }))
    }

    /// Create an element whose namespace follows from the element it will be
    /// inserted into
    pub fn create_element_in(
        &mut self,
        tag: &str,
        context: Option<NodeId>,
    ) -> Result<NodeId, RenderError> {
        let (in_svg, integration_point) = match context.and_then(|c| self.element(c)) {
            Some(parent) => (
                parent.namespace == Namespace::Svg || tag == "svg",
                parent.namespace == Namespace::Svg
                    && SVG_INTEGRATION_POINTS.contains(&parent.tag.as_str()),
            ),
            None => (tag == "svg", false),
        };

        if in_svg && !integration_point {
            if SVG_BLACKLIST.contains(&tag) {
                return Err(RenderError::dom(format!(
                    "Cannot create a {} inside an SVG context",
                    tag
                )));
            }
            Ok(self.create_element_ns(Namespace::Svg, tag))
        } else {
            Ok(self.create_element(tag))
        }
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Comment(text.to_string()))
    }

    // ===== Tree accessors =====

    pub fn data(&self, node: NodeId) -> &NodeData {
        &self.nodes[node.index()].data
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].parent
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].first_child
    }

    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].last_child
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].next
    }

    pub fn prev_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].prev
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.first_child(node);
        while let Some(child) = current {
            out.push(child);
            current = self.next_sibling(child);
        }
        out
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match &self.nodes[node.index()].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node.index()].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.data(node), NodeData::Element(_))
    }

    pub fn is_text(&self, node: NodeId) -> bool {
        matches!(self.data(node), NodeData::Text(_))
    }

    pub fn is_comment(&self, node: NodeId) -> bool {
        matches!(self.data(node), NodeData::Comment(_))
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|el| el.tag.as_str())
    }

    /// Character data of a text or comment node
    pub fn node_value(&self, node: NodeId) -> Option<&str> {
        match self.data(node) {
            NodeData::Text(s) | NodeData::Comment(s) => Some(s),
            _ => None,
        }
    }

    pub fn set_node_value(&mut self, node: NodeId, value: &str) {
        if let NodeData::Text(s) | NodeData::Comment(s) = &mut self.nodes[node.index()].data {
            *s = value.to_string();
            self.mutations += 1;
        }
    }

    pub fn text_content(&self, node: NodeId) -> String {
        match self.data(node) {
            NodeData::Text(s) => s.clone(),
            NodeData::Comment(_) => String::new(),
            _ => self
                .children(node)
                .into_iter()
                .map(|c| self.text_content(c))
                .collect(),
        }
    }

    /// Depth-first search below `node`
    pub fn find_descendant(
        &self,
        node: NodeId,
        predicate: &dyn Fn(&Document, NodeId) -> bool,
    ) -> Option<NodeId> {
        for child in self.children(node) {
            if predicate(self, child) {
                return Some(child);
            }
            if let Some(found) = self.find_descendant(child, predicate) {
                return Some(found);
            }
        }
        None
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.parent(n);
        }
        false
    }

    // ===== Mutation =====

    fn detach(&mut self, node: NodeId) {
        let slot = &self.nodes[node.index()];
        let (parent, prev, next) = (slot.parent, slot.prev, slot.next);
        let Some(parent) = parent else {
            return;
        };
        match prev {
            Some(p) => self.nodes[p.index()].next = next,
            None => self.nodes[parent.index()].first_child = next,
        }
        match next {
            Some(n) => self.nodes[n.index()].prev = prev,
            None => self.nodes[parent.index()].last_child = prev,
        }
        let slot = &mut self.nodes[node.index()];
        slot.parent = None;
        slot.prev = None;
        slot.next = None;
    }

    /// Insert `node` into `parent` before `reference`, or at the end when
    /// `reference` is `None`. An attached node is moved.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), RenderError> {
        if let Some(r) = reference {
            if self.parent(r) != Some(parent) {
                return Err(RenderError::dom(
                    "insertBefore reference node is not a child of the parent",
                ));
            }
        }
        if node == parent || self.contains(node, parent) {
            return Err(RenderError::dom("cannot insert a node into itself"));
        }
        self.detach(node);

        let prev = match reference {
            Some(r) => self.nodes[r.index()].prev,
            None => self.nodes[parent.index()].last_child,
        };
        {
            let slot = &mut self.nodes[node.index()];
            slot.parent = Some(parent);
            slot.prev = prev;
            slot.next = reference;
        }
        match prev {
            Some(p) => self.nodes[p.index()].next = Some(node),
            None => self.nodes[parent.index()].first_child = Some(node),
        }
        match reference {
            Some(r) => self.nodes[r.index()].prev = Some(node),
            None => self.nodes[parent.index()].last_child = Some(node),
        }
        self.mutations += 1;
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), RenderError> {
        self.insert_before(parent, node, None)
    }

    pub fn insert_after(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: NodeId,
    ) -> Result<(), RenderError> {
        let next = self.next_sibling(reference);
        self.insert_before(parent, node, next)
    }

    /// Detach `node`, returning its former next sibling
    pub fn remove(&mut self, node: NodeId) -> Option<NodeId> {
        let next = self.next_sibling(node);
        if self.parent(node).is_some() {
            self.detach(node);
            self.mutations += 1;
        }
        next
    }

    /// Parse `html` and insert the result before `reference`
    ///
    /// Returns the first and last inserted nodes. Empty markup inserts an
    /// empty comment so the range is never empty.
    pub fn insert_html_before(
        &mut self,
        parent: NodeId,
        reference: Option<NodeId>,
        html: &str,
    ) -> Result<(NodeId, NodeId), RenderError> {
        if html.is_empty() {
            let comment = self.create_comment("");
            self.insert_before(parent, comment, reference)?;
            return Ok((comment, comment));
        }
        let nodes = super::html::parse_fragment(self, html, Some(parent))?;
        let (Some(&first), Some(&last)) = (nodes.first(), nodes.last()) else {
            let comment = self.create_comment("");
            self.insert_before(parent, comment, reference)?;
            return Ok((comment, comment));
        };
        for node in nodes {
            self.insert_before(parent, node, reference)?;
        }
        Ok((first, last))
    }

    // ===== Attributes and properties =====

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?
            .attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn attributes(&self, node: NodeId) -> &[Attribute] {
        self.element(node)
            .map(|el| el.attributes.as_slice())
            .unwrap_or(&[])
    }

    pub fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
        namespace: Option<&str>,
    ) {
        let Some(el) = self.element_mut(node) else {
            return;
        };
        match el.attributes.iter_mut().find(|a| a.name == name) {
            Some(attr) => attr.value = value.to_string(),
            None => el.attributes.push(Attribute {
                name: name.to_string(),
                value: value.to_string(),
                namespace: namespace.map(str::to_string),
            }),
        }
        self.mutations += 1;
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        let Some(el) = self.element_mut(node) else {
            return;
        };
        let before = el.attributes.len();
        el.attributes.retain(|a| a.name != name);
        if el.attributes.len() != before {
            self.mutations += 1;
        }
    }

    pub fn get_property(&self, node: NodeId, name: &str) -> Option<&Value> {
        self.element(node)?.properties.get(name)
    }

    pub fn set_property(&mut self, node: NodeId, name: &str, value: Value) {
        if let Some(el) = self.element_mut(node) {
            el.properties.insert(name.to_string(), value);
            self.mutations += 1;
        }
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        super::html::serialize(self, node, true)
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        super::html::serialize(self, node, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_move_and_remove() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        doc.append_child(doc.root(), div).unwrap();
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        doc.append_child(div, a).unwrap();
        doc.insert_before(div, b, Some(a)).unwrap();
        assert_eq!(doc.text_content(div), "ba");

        doc.append_child(div, b).unwrap();
        assert_eq!(doc.text_content(div), "ab");

        assert_eq!(doc.remove(a), Some(b));
        assert_eq!(doc.children(div), vec![b]);
    }

    #[test]
    fn test_mutations_are_counted() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let before = doc.mutation_count();
        doc.append_child(doc.root(), div).unwrap();
        doc.set_attribute(div, "class", "x", None);
        doc.remove_attribute(div, "missing");
        assert_eq!(doc.mutation_count(), before + 2);
    }

    #[test]
    fn test_svg_namespace_rules() {
        let mut doc = Document::new();
        let svg = doc.create_element_in("svg", None).unwrap();
        assert_eq!(doc.element(svg).unwrap().namespace, Namespace::Svg);

        let circle = doc.create_element_in("circle", Some(svg)).unwrap();
        assert_eq!(doc.element(circle).unwrap().namespace, Namespace::Svg);

        let foreign = doc.create_element_in("foreignObject", Some(svg)).unwrap();
        let div = doc.create_element_in("div", Some(foreign)).unwrap();
        assert_eq!(doc.element(div).unwrap().namespace, Namespace::Html);

        let err = doc.create_element_in("div", Some(svg)).unwrap_err();
        assert!(matches!(err, RenderError::Dom { .. }));
    }

    #[test]
    fn test_insert_html_returns_bounds() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let (first, last) = doc.insert_html_before(div, None, "<b>x</b> y").unwrap();
        assert_eq!(doc.tag_name(first), Some("b"));
        assert_eq!(doc.node_value(last), Some(" y"));

        let (empty_first, empty_last) = doc.insert_html_before(div, None, "").unwrap();
        assert_eq!(empty_first, empty_last);
        assert!(doc.is_comment(empty_first));
    }
}
