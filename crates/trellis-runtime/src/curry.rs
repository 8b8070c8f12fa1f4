//! Curried definitions
//!
//! `(component "card" title="x")` and friends wrap a definition together
//! with arguments. Wrappers nest; resolving one walks to the innermost
//! definition and flattens the arguments.

use crate::arguments::CapturedArguments;
use crate::environment::Resolver;
use crate::error::RenderError;
use crate::reference::{create_compute_ref, value_for_ref, Reference};
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CurriedKind {
    Component = 0,
    Helper = 1,
    Modifier = 2,
}

impl CurriedKind {
    pub fn from_i32(value: i32) -> Result<Self, RenderError> {
        match value {
            0 => Ok(CurriedKind::Component),
            1 => Ok(CurriedKind::Helper),
            2 => Ok(CurriedKind::Modifier),
            other => Err(RenderError::invariant(format!(
                "unknown curried kind {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurriedValue {
    pub kind: CurriedKind,
    /// A definition, a string naming one, or another curried value
    pub inner: Value,
    pub owner: Value,
    pub args: Option<CapturedArguments>,
}

impl CurriedValue {
    pub fn new(kind: CurriedKind, inner: Value, owner: Value, args: Option<CapturedArguments>) -> Self {
        Self {
            kind,
            inner,
            owner,
            args,
        }
    }

    pub fn kind(&self) -> CurriedKind {
        self.kind
    }
}

/// A curried value flattened down to its definition
#[derive(Debug, Clone)]
pub struct ResolvedCurry {
    pub definition: Value,
    pub owner: Value,
    /// Innermost wrapper's arguments first
    pub positional: Vec<Reference>,
    /// Outer wrappers override inner ones
    pub named: Vec<(Rc<str>, Reference)>,
}

impl ResolvedCurry {
    /// Arguments for invoking the definition: curried positionals first,
    /// invocation named arguments overriding curried ones
    pub fn merge(&self, args: &CapturedArguments) -> CapturedArguments {
        let mut positional = self.positional.clone();
        positional.extend(args.positional.iter().cloned());
        let mut named = self.named.clone();
        for (name, reference) in &args.named {
            match named.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = reference.clone(),
                None => named.push((name.clone(), reference.clone())),
            }
        }
        CapturedArguments::new(positional, named)
    }
}

pub fn resolve_curried_value(curried: &CurriedValue) -> ResolvedCurry {
    let mut layers = vec![curried];
    let mut current = curried;
    while let Value::Curried(inner) = &current.inner {
        layers.push(inner);
        current = inner;
    }

    let mut positional = Vec::new();
    let mut named: Vec<(Rc<str>, Reference)> = Vec::new();
    for layer in layers.iter().rev() {
        if let Some(args) = &layer.args {
            positional.extend(args.positional.iter().cloned());
            for (name, reference) in &args.named {
                match named.iter_mut().find(|(n, _)| n == name) {
                    Some(slot) => slot.1 = reference.clone(),
                    None => named.push((name.clone(), reference.clone())),
                }
            }
        }
    }

    ResolvedCurry {
        definition: current.inner.clone(),
        owner: current.owner.clone(),
        positional,
        named,
    }
}

/// Reference producing a curried value each time `inner` changes
///
/// String definitions are resolved eagerly so a missing name fails where the
/// curry happens. While `inner` keeps producing an equal value the same
/// curried value is returned.
pub fn create_curry_ref(
    kind: CurriedKind,
    inner: Reference,
    owner: Value,
    args: Option<CapturedArguments>,
    resolver: Rc<Resolver>,
) -> Reference {
    let last: RefCell<Option<(Value, Value)>> = RefCell::new(None);
    create_compute_ref(move || {
        let value = value_for_ref(&inner)?;
        if let Some((previous, curried)) = last.borrow().as_ref() {
            if *previous == value {
                return Ok(curried.clone());
            }
        }

        let definition = match &value {
            Value::Null => Value::Null,
            Value::String(name) => match kind {
                CurriedKind::Component => Value::Component(resolver.lookup_component(name)?),
                CurriedKind::Helper => Value::Helper(resolver.lookup_helper(name)?),
                CurriedKind::Modifier => Value::Modifier(resolver.lookup_modifier(name)?),
            },
            other => other.clone(),
        };

        let curried = if definition.is_null() {
            Value::Null
        } else {
            Value::Curried(Rc::new(CurriedValue::new(
                kind,
                definition,
                owner.clone(),
                args.clone(),
            )))
        };
        *last.borrow_mut() = Some((value, curried.clone()));
        Ok(curried)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(positional: &[&str], named: &[(&str, &str)]) -> Option<CapturedArguments> {
        Some(CapturedArguments::new(
            positional.iter().map(|p| Reference::constant(*p)).collect(),
            named
                .iter()
                .map(|(k, v)| (Rc::from(*k), Reference::constant(*v)))
                .collect(),
        ))
    }

    fn text(reference: &Reference) -> String {
        value_for_ref(reference).unwrap().to_text()
    }

    #[test]
    fn test_nested_curry_flattens_arguments() {
        let inner = CurriedValue::new(
            CurriedKind::Helper,
            Value::from("shout"),
            Value::Null,
            args(&["a"], &[("tone", "inner"), ("size", "s")]),
        );
        let outer = CurriedValue::new(
            CurriedKind::Helper,
            Value::Curried(Rc::new(inner)),
            Value::Null,
            args(&["b"], &[("tone", "outer")]),
        );

        let resolved = resolve_curried_value(&outer);
        assert_eq!(resolved.definition, Value::from("shout"));
        let positional: Vec<_> = resolved.positional.iter().map(text).collect();
        assert_eq!(positional, vec!["a", "b"]);
        let named: Vec<_> = resolved
            .named
            .iter()
            .map(|(k, v)| (k.to_string(), text(v)))
            .collect();
        assert_eq!(
            named,
            vec![
                ("tone".to_string(), "outer".to_string()),
                ("size".to_string(), "s".to_string())
            ]
        );
    }

    #[test]
    fn test_curry_ref_reports_missing_component() {
        let reference = create_curry_ref(
            CurriedKind::Component,
            Reference::constant("nope"),
            Value::Null,
            None,
            Rc::new(Resolver::default()),
        );
        assert_eq!(
            value_for_ref(&reference).unwrap_err(),
            RenderError::MissingComponent {
                path: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_curry_ref_keeps_identity_for_equal_input() {
        let source = Reference::root(Value::Null);
        let reference = create_curry_ref(
            CurriedKind::Helper,
            source.clone(),
            Value::Null,
            None,
            Rc::new(Resolver::default()),
        );
        assert!(value_for_ref(&reference).unwrap().is_null());

        let helper = crate::helper::HelperDefinition::function("id", |_| Ok(Value::Null));
        source.set(Value::Helper(helper.clone()));
        let first = value_for_ref(&reference).unwrap();
        source.set(Value::Null);
        source.set(Value::Helper(helper));
        let second = value_for_ref(&reference).unwrap();
        assert!(matches!(first, Value::Curried(_)));
        assert_eq!(first, second);
    }
}
