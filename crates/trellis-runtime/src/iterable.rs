//! Keyed iteration for `{{#each}}`
//!
//! Arrays iterate their elements with the index as memo. Objects iterate
//! their entries in key order with the property name as memo. Anything else
//! iterates nothing.

use crate::error::RenderError;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct IterationItem {
    pub key: Rc<str>,
    pub value: Value,
    pub memo: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyMode<'a> {
    Identity,
    Index,
    Memo,
    Path(&'a str),
}

impl<'a> KeyMode<'a> {
    fn parse(key: &'a str) -> Self {
        match key {
            "@identity" | "" => KeyMode::Identity,
            "@index" => KeyMode::Index,
            "@key" => KeyMode::Memo,
            path => KeyMode::Path(path),
        }
    }

    fn key_for(self, value: &Value, memo: &Value) -> String {
        match self {
            KeyMode::Identity => value.identity_key(),
            KeyMode::Index | KeyMode::Memo => memo.to_text(),
            KeyMode::Path(path) => path
                .split('.')
                .fold(value.clone(), |current, segment| current.get(segment))
                .to_text(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListIterator {
    items: Vec<IterationItem>,
    position: usize,
}

impl ListIterator {
    pub fn new(iterable: &Value, key: &str) -> Result<Self, RenderError> {
        let mode = KeyMode::parse(key);
        let entries: Vec<(Value, Value)> = match iterable {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (v.clone(), Value::from(i as i64)))
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (v.clone(), Value::from(k.as_str())))
                .collect(),
            _ => Vec::new(),
        };

        // A renamed duplicate must never collide with a real key further on.
        let mut used: HashSet<String> = HashSet::new();
        let mut suffixes: HashMap<String, usize> = HashMap::new();
        let items = entries
            .into_iter()
            .map(|(value, memo)| {
                let base = mode.key_for(&value, &memo);
                let mut key = base.clone();
                if used.contains(&key) {
                    let n = suffixes.entry(base.clone()).or_insert(0);
                    loop {
                        *n += 1;
                        key = format!("{}#{}", base, n);
                        if !used.contains(&key) {
                            break;
                        }
                    }
                }
                used.insert(key.clone());
                IterationItem {
                    key: Rc::from(key),
                    value,
                    memo,
                }
            })
            .collect();

        Ok(Self { items, position: 0 })
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Every item, regardless of how far iteration has advanced
    pub fn items(&self) -> &[IterationItem] {
        &self.items
    }
}

impl Iterator for ListIterator {
    type Item = IterationItem;

    fn next(&mut self) -> Option<IterationItem> {
        let item = self.items.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        item
    }
}
