//! Invocation arguments
//!
//! Arguments live on the evaluation stack, bottom to top:
//!
//! ```text
//! [block table, block scope, block handle] * blocks
//! [positional] * positional_count
//! [named] * names.len()
//! ```
//!
//! `ArgsLayout` is only a description of that region; reading goes straight
//! to the stack slots. `CapturedArguments` is the stack-independent snapshot
//! stored by helpers, modifiers and updating opcodes.

use crate::error::RenderError;
use crate::reference::{value_for_ref, Reference};
use crate::scope::{Scope, ScopeBlock};
use crate::validator::{combine, Tag};
use crate::value::Value;
use crate::vm::stack::{EvaluationStack, StackValue};
use std::collections::BTreeMap;
use std::rc::Rc;

pub const SLOTS_PER_BLOCK: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgsLayout {
    /// Absolute stack index of the first slot
    pub base: usize,
    pub positional_count: usize,
    pub names: Rc<[Rc<str>]>,
    pub block_names: Rc<[Rc<str>]>,
}

impl ArgsLayout {
    /// Describe the region ending at the top of `stack`
    pub fn setup(
        stack: &EvaluationStack,
        names: Rc<[Rc<str>]>,
        block_names: Rc<[Rc<str>]>,
        positional_count: usize,
    ) -> Result<Self, RenderError> {
        let len = names.len() + positional_count + block_names.len() * SLOTS_PER_BLOCK;
        let top = stack.len();
        let base = top.checked_sub(len).ok_or_else(|| {
            RenderError::invariant(format!(
                "argument region of {} slots exceeds stack height {}",
                len, top
            ))
        })?;
        Ok(Self {
            base,
            positional_count,
            names,
            block_names,
        })
    }

    pub fn empty(stack: &EvaluationStack) -> Self {
        Self {
            base: stack.len(),
            positional_count: 0,
            names: Rc::from(Vec::new()),
            block_names: Rc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.block_names.len() * SLOTS_PER_BLOCK + self.positional_count + self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn positional_base(&self) -> usize {
        self.base + self.block_names.len() * SLOTS_PER_BLOCK
    }

    fn named_base(&self) -> usize {
        self.positional_base() + self.positional_count
    }

    pub fn positional(&self, stack: &EvaluationStack, index: usize) -> Result<Reference, RenderError> {
        if index >= self.positional_count {
            return Ok(Reference::null());
        }
        stack.get_abs(self.positional_base() + index)?.as_reference()
    }

    pub fn named(&self, stack: &EvaluationStack, name: &str) -> Result<Option<Reference>, RenderError> {
        match self.names.iter().position(|n| &**n == name) {
            Some(i) => stack.get_abs(self.named_base() + i)?.as_reference().map(Some),
            None => Ok(None),
        }
    }

    pub fn has_named(&self, name: &str) -> bool {
        self.names.iter().any(|n| &**n == name)
    }

    /// Block passed under `name`, if any
    pub fn block(&self, stack: &EvaluationStack, name: &str) -> Result<Option<ScopeBlock>, RenderError> {
        let Some(i) = self.block_names.iter().position(|n| &**n == name) else {
            return Ok(None);
        };
        let at = self.base + i * SLOTS_PER_BLOCK;
        block_from_slots(
            stack.get_abs(at)?,
            stack.get_abs(at + 1)?,
            stack.get_abs(at + 2)?,
        )
    }

    pub fn capture(&self, stack: &EvaluationStack) -> Result<CapturedArguments, RenderError> {
        let positional = (0..self.positional_count)
            .map(|i| self.positional(stack, i))
            .collect::<Result<Vec<_>, _>>()?;
        let named = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Ok((
                    name.clone(),
                    stack.get_abs(self.named_base() + i)?.as_reference()?,
                ))
            })
            .collect::<Result<Vec<_>, RenderError>>()?;
        Ok(CapturedArguments { positional, named })
    }

    /// The raw block slots, bottom to top
    pub fn block_slots(&self, stack: &EvaluationStack) -> Result<Vec<StackValue>, RenderError> {
        (self.base..self.positional_base())
            .map(|i| stack.get_abs(i).cloned())
            .collect()
    }
}

/// Assemble a scope block from its three stack slots
pub fn block_from_slots(
    table: &StackValue,
    scope: &StackValue,
    handle: &StackValue,
) -> Result<Option<ScopeBlock>, RenderError> {
    match (table, scope, handle) {
        (StackValue::Table(table), StackValue::Scope(scope), StackValue::Int(handle)) => {
            Ok(Some(ScopeBlock {
                handle: usize::try_from(*handle)
                    .map_err(|_| RenderError::invariant("negative block handle"))?,
                scope: Scope::clone(scope),
                table: table.clone(),
            }))
        }
        (StackValue::Null, _, _) | (_, _, StackValue::Null) => Ok(None),
        (table, scope, handle) => Err(RenderError::invariant(format!(
            "malformed block slots: {:?}, {:?}, {:?}",
            table, scope, handle
        ))),
    }
}

/// Stack-independent argument snapshot
#[derive(Debug, Clone, Default)]
pub struct CapturedArguments {
    pub positional: Vec<Reference>,
    pub named: Vec<(Rc<str>, Reference)>,
}

impl CapturedArguments {
    pub fn new(positional: Vec<Reference>, named: Vec<(Rc<str>, Reference)>) -> Self {
        Self { positional, named }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn positional(&self, index: usize) -> Option<&Reference> {
        self.positional.get(index)
    }

    pub fn named(&self, name: &str) -> Option<&Reference> {
        self.named
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, reference)| reference)
    }

    /// Combined tag of every argument reference
    pub fn tag(&self) -> Tag {
        combine(
            self.positional
                .iter()
                .chain(self.named.iter().map(|(_, r)| r))
                .map(Reference::tag)
                .collect(),
        )
    }

    pub fn positional_values(&self) -> Result<Vec<Value>, RenderError> {
        self.positional.iter().map(value_for_ref).collect()
    }

    pub fn named_values(&self) -> Result<BTreeMap<String, Value>, RenderError> {
        self.named
            .iter()
            .map(|(name, reference)| Ok((name.to_string(), value_for_ref(reference)?)))
            .collect()
    }

    /// JSON view used by the debug render tree
    pub fn to_json(&self) -> Result<serde_json::Value, RenderError> {
        Ok(serde_json::json!({
            "positional": self
                .positional_values()?
                .iter()
                .map(Value::to_json)
                .collect::<Vec<_>>(),
            "named": self
                .named_values()?
                .into_iter()
                .map(|(k, v)| (k, v.to_json()))
                .collect::<serde_json::Map<_, _>>(),
        }))
    }
}

/// Replacement arguments returned by a manager's `prepare_args`
#[derive(Debug, Clone, Default)]
pub struct PreparedArguments {
    pub positional: Vec<Reference>,
    pub named: Vec<(String, Reference)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Rc<[Rc<str>]> {
        list.iter().map(|s| Rc::from(*s)).collect()
    }

    #[test]
    fn test_layout_reads_from_stack_slots() {
        let mut stack = EvaluationStack::new(8);
        stack.push(StackValue::Ref(Reference::constant("ignored")));
        stack.push(StackValue::Ref(Reference::constant("a")));
        stack.push(StackValue::Ref(Reference::constant("b")));
        stack.push(StackValue::Ref(Reference::constant("named")));

        let layout = ArgsLayout::setup(&stack, names(&["title"]), names(&[]), 2).unwrap();
        assert_eq!(layout.base, 1);
        let captured = layout.capture(&stack).unwrap();
        assert_eq!(
            captured.positional_values().unwrap(),
            vec![Value::from("a"), Value::from("b")]
        );
        assert_eq!(
            value_for_ref(captured.named("title").unwrap()).unwrap(),
            Value::from("named")
        );
        assert!(layout.named(&stack, "missing").unwrap().is_none());
    }

    #[test]
    fn test_oversized_layout_is_an_invariant_violation() {
        let stack = EvaluationStack::new(4);
        let err = ArgsLayout::setup(&stack, names(&["x"]), names(&[]), 0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_captured_tag_covers_all_arguments() {
        let root = Reference::root(1i64);
        let args = CapturedArguments::new(
            vec![Reference::constant(0i64)],
            vec![(Rc::from("x"), root.clone())],
        );
        let tag = args.tag();
        let snapshot = crate::validator::value_for_tag(&tag);
        root.set(2i64);
        assert!(!crate::validator::validate_tag(&tag, snapshot));
    }
}
