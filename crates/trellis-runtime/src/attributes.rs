//! Dynamic attributes
//!
//! An attribute whose value comes from a reference is classified once, when
//! the element is opened. The classification decides whether updates go to
//! an attribute or to a property, and whether URL-bearing values are
//! sanitized.

use crate::dom::{Document, Namespace, NodeId};
use crate::value::Value;
use std::rc::Rc;

const URI_TAGS: &[&str] = &["a", "body", "link", "img", "iframe", "base", "form"];
const URI_ATTRIBUTES: &[&str] = &["href", "src", "background", "action"];
const BAD_PROTOCOLS: &[&str] = &["javascript:", "vbscript:"];

/// Element properties that shadow their attribute
const PROPERTIES: &[(&str, &[&str])] = &[
    ("input", &["value", "checked", "disabled", "indeterminate"]),
    ("textarea", &["value", "disabled"]),
    ("select", &["value", "disabled", "multiple"]),
    ("option", &["value", "selected", "disabled"]),
    ("button", &["disabled"]),
    ("video", &["muted"]),
    ("audio", &["muted"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Simple,
    /// Attribute whose value is sanitized first
    SafeSimple,
    DefaultProperty,
    SafeProperty,
    /// `value` of a text control; only written when it differs
    InputValue,
    OptionSelected,
}

/// A write the element builder performs while the element is being built
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeWrite {
    Attribute {
        name: Rc<str>,
        value: String,
        namespace: Option<Rc<str>>,
    },
    Property {
        name: Rc<str>,
        value: Value,
    },
}

#[derive(Debug, Clone)]
pub struct DynamicAttribute {
    pub kind: AttributeKind,
    pub element: NodeId,
    pub name: Rc<str>,
    pub namespace: Option<Rc<str>>,
    tag: String,
    last_property: Option<Value>,
}

fn requires_sanitization(tag: &str, name: &str) -> bool {
    (URI_TAGS.contains(&tag) && URI_ATTRIBUTES.contains(&name)) || (tag == "embed" && name == "src")
}

fn is_property(tag: &str, name: &str) -> bool {
    PROPERTIES
        .iter()
        .any(|(t, props)| *t == tag && props.contains(&name))
}

/// Prefix dangerous URLs with `unsafe:`
pub fn sanitize_attribute_value(tag: &str, name: &str, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let text = value.to_text();
    let tag = tag.to_ascii_lowercase();
    if tag == "embed" && name == "src" {
        return Value::from(format!("unsafe:{}", text));
    }
    if URI_TAGS.contains(&tag.as_str()) && URI_ATTRIBUTES.contains(&name) {
        let protocol = text
            .split_once(':')
            .map(|(scheme, _)| format!("{}:", scheme.trim().to_ascii_lowercase()));
        if let Some(protocol) = protocol {
            if BAD_PROTOCOLS.contains(&protocol.as_str()) {
                return Value::from(format!("unsafe:{}", text));
            }
        }
    }
    match value {
        Value::SafeString(s) => Value::String(s.clone()),
        other => other.clone(),
    }
}

/// Attribute text for a value; `None` removes the attribute
pub fn normalize_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some(String::new()),
        Value::Helper(_) | Value::Modifier(_) | Value::Component(_) | Value::Curried(_) => None,
        other => Some(other.to_text()),
    }
}

impl DynamicAttribute {
    /// Classify `name` on `element`
    ///
    /// `serializing` forces attributes, since serialized markup carries no
    /// properties. `trusting` skips sanitization.
    pub fn new(
        document: &Document,
        element: NodeId,
        name: &str,
        namespace: Option<Rc<str>>,
        trusting: bool,
        serializing: bool,
    ) -> Self {
        let (tag, is_svg) = match document.element(element) {
            Some(el) => (el.tag.to_ascii_lowercase(), el.namespace == Namespace::Svg),
            None => (String::new(), false),
        };
        let sanitize = !trusting && requires_sanitization(&tag, name);
        let as_property = !serializing && !is_svg && namespace.is_none() && is_property(&tag, name);

        let kind = if as_property {
            match (tag.as_str(), name) {
                ("input" | "textarea", "value") => AttributeKind::InputValue,
                ("option", "selected") => AttributeKind::OptionSelected,
                _ if sanitize => AttributeKind::SafeProperty,
                _ => AttributeKind::DefaultProperty,
            }
        } else if sanitize {
            AttributeKind::SafeSimple
        } else {
            AttributeKind::Simple
        };

        Self {
            kind,
            element,
            name: Rc::from(name),
            namespace,
            tag,
            last_property: None,
        }
    }

    fn sanitized(&self, value: &Value) -> Value {
        match self.kind {
            AttributeKind::SafeSimple | AttributeKind::SafeProperty => {
                sanitize_attribute_value(&self.tag, &self.name, value)
            }
            _ => value.clone(),
        }
    }

    /// The write for the first render, if any
    pub fn initial(&mut self, value: &Value) -> Option<AttributeWrite> {
        let value = self.sanitized(value);
        match self.kind {
            AttributeKind::Simple | AttributeKind::SafeSimple => {
                normalize_value(&value).map(|text| AttributeWrite::Attribute {
                    name: self.name.clone(),
                    value: text,
                    namespace: self.namespace.clone(),
                })
            }
            AttributeKind::DefaultProperty | AttributeKind::SafeProperty => {
                if value.is_null() {
                    return None;
                }
                self.last_property = Some(value.clone());
                Some(AttributeWrite::Property {
                    name: self.name.clone(),
                    value,
                })
            }
            AttributeKind::InputValue => Some(AttributeWrite::Property {
                name: self.name.clone(),
                value: Value::from(value.to_text()),
            }),
            AttributeKind::OptionSelected => {
                if value.is_null() || value == Value::Bool(false) {
                    None
                } else {
                    Some(AttributeWrite::Property {
                        name: self.name.clone(),
                        value: Value::Bool(true),
                    })
                }
            }
        }
    }

    /// Apply a changed value to the live element
    pub fn update(&mut self, document: &mut Document, value: &Value) {
        let value = self.sanitized(value);
        match self.kind {
            AttributeKind::Simple | AttributeKind::SafeSimple => match normalize_value(&value) {
                Some(text) => {
                    document.set_attribute(self.element, &self.name, &text, self.namespace.as_deref())
                }
                None => document.remove_attribute(self.element, &self.name),
            },
            AttributeKind::DefaultProperty | AttributeKind::SafeProperty => {
                if self.last_property.as_ref() != Some(&value) {
                    document.set_property(self.element, &self.name, value.clone());
                    if value.is_null() {
                        document.remove_attribute(self.element, &self.name);
                    }
                    self.last_property = Some(value);
                }
            }
            AttributeKind::InputValue => {
                let text = Value::from(value.to_text());
                if document.get_property(self.element, &self.name) != Some(&text) {
                    document.set_property(self.element, &self.name, text);
                }
            }
            AttributeKind::OptionSelected => {
                document.set_property(self.element, &self.name, Value::Bool(value.truthy()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a", "href", false, false, AttributeKind::SafeSimple)]
    #[case("a", "href", true, false, AttributeKind::Simple)]
    #[case("div", "class", false, false, AttributeKind::Simple)]
    #[case("input", "value", false, false, AttributeKind::InputValue)]
    #[case("input", "checked", false, false, AttributeKind::DefaultProperty)]
    #[case("input", "checked", false, true, AttributeKind::Simple)]
    #[case("option", "selected", false, false, AttributeKind::OptionSelected)]
    fn test_classification(
        #[case] tag: &str,
        #[case] name: &str,
        #[case] trusting: bool,
        #[case] serializing: bool,
        #[case] expected: AttributeKind,
    ) {
        let mut doc = Document::new();
        let el = doc.create_element(tag);
        let attr = DynamicAttribute::new(&doc, el, name, None, trusting, serializing);
        assert_eq!(attr.kind, expected);
    }

    #[rstest]
    #[case("a", "href", "javascript:alert(1)", "unsafe:javascript:alert(1)")]
    #[case("img", "src", " VBScript:x", "unsafe: VBScript:x")]
    #[case("a", "href", "https://example.com", "https://example.com")]
    #[case("embed", "src", "movie.swf", "unsafe:movie.swf")]
    #[case("div", "href", "javascript:x", "javascript:x")]
    fn test_sanitization(
        #[case] tag: &str,
        #[case] name: &str,
        #[case] input: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(
            sanitize_attribute_value(tag, name, &Value::from(input)),
            Value::from(expected)
        );
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_value(&Value::Bool(true)), Some(String::new()));
        assert_eq!(normalize_value(&Value::Bool(false)), None);
        assert_eq!(normalize_value(&Value::Null), None);
        assert_eq!(normalize_value(&Value::from(2i64)), Some("2".to_string()));
    }

    #[test]
    fn test_update_removes_attribute_for_null() {
        let mut doc = Document::new();
        let el = doc.create_element("div");
        let mut attr = DynamicAttribute::new(&doc, el, "title", None, false, false);
        attr.update(&mut doc, &Value::from("a"));
        assert_eq!(doc.get_attribute(el, "title"), Some("a"));
        attr.update(&mut doc, &Value::Null);
        assert_eq!(doc.get_attribute(el, "title"), None);
    }

    #[test]
    fn test_input_value_skips_identical_writes() {
        let mut doc = Document::new();
        let el = doc.create_element("input");
        let mut attr = DynamicAttribute::new(&doc, el, "value", None, false, false);
        attr.update(&mut doc, &Value::from("x"));
        let before = doc.mutation_count();
        attr.update(&mut doc, &Value::from("x"));
        assert_eq!(doc.mutation_count(), before);
        assert_eq!(doc.get_property(el, "value"), Some(&Value::from("x")));
    }
}
