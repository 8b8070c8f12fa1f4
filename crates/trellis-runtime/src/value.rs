//! Runtime values
//!
//! Values are cheap to clone: strings, arrays and objects sit behind `Rc`.
//! Equality is identity for shared values first, then structural, which is the
//! comparison `Assert` opcodes and iteration keys rely on.

use crate::component::ComponentDefinition;
use crate::curry::CurriedValue;
use crate::dom::NodeId;
use crate::helper::HelperDefinition;
use crate::modifier::ModifierDefinition;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    /// Markup trusted by the author, appended without escaping
    SafeString(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<BTreeMap<String, Value>>),
    Component(ComponentDefinition),
    Helper(HelperDefinition),
    Modifier(ModifierDefinition),
    Curried(Rc<CurriedValue>),
    /// A document node appended as-is
    Node(NodeId),
}

/// How a value is appended in content position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ContentType {
    Component = 0,
    Helper = 1,
    String = 2,
    SafeString = 3,
    Node = 4,
}

impl ContentType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ContentType::Component),
            1 => Some(ContentType::Helper),
            2 => Some(ContentType::String),
            3 => Some(ContentType::SafeString),
            4 => Some(ContentType::Node),
            _ => None,
        }
    }
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn safe(s: impl Into<Rc<str>>) -> Self {
        Value::SafeString(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Default truthiness: empty strings, empty arrays, zero and NaN are false
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::SafeString(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Value::Curried(curried) => match curried.kind() {
                crate::curry::CurriedKind::Component => ContentType::Component,
                _ => ContentType::Helper,
            },
            Value::Component(_) => ContentType::Component,
            Value::Helper(_) => ContentType::Helper,
            Value::SafeString(_) => ContentType::SafeString,
            Value::Node(_) => ContentType::Node,
            _ => ContentType::String,
        }
    }

    /// Property lookup used by paths; missing keys and non-objects give null
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.get(key).cloned().unwrap_or(Value::Null),
            Value::Array(items) => {
                if key == "length" {
                    Value::Number(items.len() as f64)
                } else {
                    key.parse::<usize>()
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(Value::Null)
                }
            }
            Value::String(s) | Value::SafeString(s) if key == "length" => {
                Value::Number(s.chars().count() as f64)
            }
            _ => Value::Null,
        }
    }

    /// Text used when the value is appended or set as an attribute
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) | Value::SafeString(s) => s.to_string(),
            Value::Array(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Component(def) => format!("<component:{}>", def.name()),
            Value::Helper(def) => format!("<helper:{}>", def.name()),
            Value::Modifier(def) => format!("<modifier:{}>", def.name()),
            Value::Curried(_) => "<curried>".to_string(),
            Value::Node(_) => String::new(),
        }
    }

    /// Identity key used by `@identity` iteration
    pub fn identity_key(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => format!("bool:{}", b),
            Value::Number(n) => format!("number:{}", format_number(*n)),
            Value::String(s) => format!("string:{}", s),
            Value::SafeString(s) => format!("safe:{}", s),
            Value::Array(items) => format!("array:{:p}", Rc::as_ptr(items)),
            Value::Object(map) => format!("object:{:p}", Rc::as_ptr(map)),
            Value::Component(def) => format!("component:{:p}", def.as_ptr()),
            Value::Helper(def) => format!("helper:{:p}", def.as_ptr()),
            Value::Modifier(def) => format!("modifier:{:p}", def.as_ptr()),
            Value::Curried(c) => format!("curried:{:p}", Rc::as_ptr(c)),
            Value::Node(id) => format!("node:{}", id.index()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) | Value::SafeString(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            other => serde_json::Value::String(other.to_text()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::SafeString(a), Value::SafeString(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Component(a), Value::Component(b)) => a.as_ptr() == b.as_ptr(),
            (Value::Helper(a), Value::Helper(b)) => a.as_ptr() == b.as_ptr(),
            (Value::Modifier(a), Value::Modifier(b)) => a.as_ptr() == b.as_ptr(),
            (Value::Curried(a), Value::Curried(b)) => Rc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::SafeString(s) => write!(f, "safe({:?})", s),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Value::Node(id) => write!(f, "node#{}", id.index()),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(Value::Null, false)]
    #[case(Value::Bool(true), true)]
    #[case(Value::Number(0.0), false)]
    #[case(Value::Number(f64::NAN), false)]
    #[case(Value::string(""), false)]
    #[case(Value::string("x"), true)]
    #[case(Value::array(vec![]), false)]
    #[case(Value::object(Vec::<(String, Value)>::new()), true)]
    fn test_truthy(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.truthy(), expected);
    }

    #[test]
    fn test_text_formatting() {
        assert_eq!(Value::Number(3.0).to_text(), "3");
        assert_eq!(Value::Number(2.5).to_text(), "2.5");
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::from(json!([1, "a"])).to_text(), "1,a");
    }

    #[test]
    fn test_get_path_segments() {
        let value = Value::from(json!({"user": {"name": "Ada"}, "tags": ["a", "b"]}));
        assert_eq!(value.get("user").get("name"), Value::string("Ada"));
        assert_eq!(value.get("tags").get("1"), Value::string("b"));
        assert_eq!(value.get("tags").get("length"), Value::Number(2.0));
        assert_eq!(value.get("missing"), Value::Null);
    }

    #[test]
    fn test_identity_key_distinguishes_shared_objects() {
        let a = Value::from(json!({"id": 1}));
        let b = Value::from(json!({"id": 1}));
        assert_eq!(a, b);
        assert_ne!(a.identity_key(), b.identity_key());
        assert_eq!(a.identity_key(), a.clone().identity_key());
    }
}
