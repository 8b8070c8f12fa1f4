//! Helpers
//!
//! A helper invocation produces a computed reference. Function helpers are
//! re-run whenever an argument they read changes. Managed helpers create an
//! instance once per invocation and read their value from it; the instance is
//! destroyed with the enclosing block.

use crate::arguments::CapturedArguments;
use crate::curry::{resolve_curried_value, CurriedKind};
use crate::environment::Resolver;
use crate::error::RenderError;
use crate::reference::{create_compute_ref, create_labeled_compute_ref, value_for_ref, Reference};
use crate::validator::{untrack, value_for_tag, Revision};
use crate::value::Value;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type HelperFn = dyn Fn(&CapturedArguments) -> Result<Value, RenderError>;
pub type HelperState = Rc<dyn Any>;

pub trait HelperManager {
    fn create(&self, args: &CapturedArguments) -> Result<HelperState, RenderError>;
    fn value(&self, state: &HelperState) -> Result<Value, RenderError>;
    fn destroy(&self, _state: &HelperState) {}
}

#[derive(Clone)]
pub enum HelperKind {
    Function(Rc<HelperFn>),
    Managed(Rc<dyn HelperManager>),
}

struct HelperInner {
    name: String,
    kind: HelperKind,
}

#[derive(Clone)]
pub struct HelperDefinition(Rc<HelperInner>);

impl HelperDefinition {
    pub fn function(
        name: impl Into<String>,
        f: impl Fn(&CapturedArguments) -> Result<Value, RenderError> + 'static,
    ) -> Self {
        HelperDefinition(Rc::new(HelperInner {
            name: name.into(),
            kind: HelperKind::Function(Rc::new(f)),
        }))
    }

    pub fn managed(name: impl Into<String>, manager: Rc<dyn HelperManager>) -> Self {
        HelperDefinition(Rc::new(HelperInner {
            name: name.into(),
            kind: HelperKind::Managed(manager),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &HelperKind {
        &self.0.kind
    }

    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for HelperDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HelperDefinition({})", self.0.name)
    }
}

/// Teardown for a helper instance, run when its block is destroyed
pub type HelperDestructor = Box<dyn FnOnce()>;

/// Reference for a static helper invocation
pub fn invoke_helper(
    definition: &HelperDefinition,
    args: Rc<CapturedArguments>,
) -> Result<(Reference, Option<HelperDestructor>), RenderError> {
    match definition.kind() {
        HelperKind::Function(f) => {
            let f = f.clone();
            let reference =
                create_labeled_compute_ref(definition.name().to_string(), move || f(&args));
            Ok((reference, None))
        }
        HelperKind::Managed(manager) => {
            let state = untrack(|| manager.create(&args))?;
            let reader = manager.clone();
            let held = state.clone();
            let reference = create_labeled_compute_ref(definition.name().to_string(), move || {
                reader.value(&held)
            });
            let manager = manager.clone();
            Ok((reference, Some(Box::new(move || manager.destroy(&state)))))
        }
    }
}

struct DynamicHelperCell {
    last_revision: Option<Revision>,
    current: Option<(Reference, Option<HelperDestructor>)>,
}

impl DynamicHelperCell {
    fn teardown(&mut self) {
        if let Some((_, Some(destroy))) = self.current.take() {
            destroy();
        }
    }
}

/// Reference for a helper whose definition is itself a reference
///
/// The helper is re-created each time the definition reference changes,
/// destroying the previous instance first. The returned destructor tears
/// down whichever instance is current.
pub fn dynamic_helper_ref(
    definition: Reference,
    args: Rc<CapturedArguments>,
    resolver: Rc<Resolver>,
) -> (Reference, HelperDestructor) {
    let cell = Rc::new(RefCell::new(DynamicHelperCell {
        last_revision: None,
        current: None,
    }));

    let state = cell.clone();
    let reference = create_compute_ref(move || {
        let value = value_for_ref(&definition)?;
        let revision = value_for_tag(&definition.tag());

        let inner = {
            let mut cell = state.borrow_mut();
            if cell.last_revision != Some(revision) || cell.current.is_none() {
                cell.teardown();
                let created = match resolve_helper_value(&value, &args, &resolver)? {
                    Some((def, merged)) => Some(untrack(|| invoke_helper(&def, merged))?),
                    None => None,
                };
                cell.current = created;
                cell.last_revision = Some(revision);
            }
            cell.current.as_ref().map(|(reference, _)| reference.clone())
        };

        match inner {
            Some(reference) => value_for_ref(&reference),
            None => Ok(Value::Null),
        }
    });

    (reference, Box::new(move || cell.borrow_mut().teardown()))
}

/// Resolve a helper-position value to a definition plus the arguments to
/// invoke it with; curried arguments come first and invocation arguments
/// override curried named ones
fn resolve_helper_value(
    value: &Value,
    args: &Rc<CapturedArguments>,
    resolver: &Resolver,
) -> Result<Option<(HelperDefinition, Rc<CapturedArguments>)>, RenderError> {
    match value {
        Value::Null => Ok(None),
        Value::Helper(def) => Ok(Some((def.clone(), args.clone()))),
        Value::String(name) => Ok(Some((resolver.lookup_helper(name)?, args.clone()))),
        Value::Curried(curried) if curried.kind() == CurriedKind::Helper => {
            let resolved = resolve_curried_value(curried);
            let def = match &resolved.definition {
                Value::Helper(def) => def.clone(),
                Value::String(name) => resolver.lookup_helper(name)?,
                other => {
                    return Err(RenderError::MissingHelper {
                        path: other.to_text(),
                    })
                }
            };
            Ok(Some((def, Rc::new(resolved.merge(args)))))
        }
        other => Err(RenderError::MissingHelper {
            path: other.to_text(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn upper() -> HelperDefinition {
        HelperDefinition::function("upper", |args| {
            Ok(Value::from(
                args.positional_values()?
                    .first()
                    .map(|v| v.to_text().to_uppercase())
                    .unwrap_or_default(),
            ))
        })
    }

    #[test]
    fn test_function_helper_recomputes_on_argument_change() {
        let input = Reference::root("a");
        let args = Rc::new(CapturedArguments::new(vec![input.clone()], vec![]));
        let (reference, destructor) = invoke_helper(&upper(), args).unwrap();
        assert!(destructor.is_none());
        assert_eq!(value_for_ref(&reference).unwrap(), Value::from("A"));
        input.set("b");
        assert_eq!(value_for_ref(&reference).unwrap(), Value::from("B"));
    }

    struct Counter {
        created: Rc<Cell<u32>>,
        destroyed: Rc<Cell<u32>>,
    }

    impl HelperManager for Counter {
        fn create(&self, _args: &CapturedArguments) -> Result<HelperState, RenderError> {
            self.created.set(self.created.get() + 1);
            Ok(Rc::new(self.created.get()))
        }

        fn value(&self, state: &HelperState) -> Result<Value, RenderError> {
            Ok(Value::from(i64::from(*state.downcast_ref::<u32>().unwrap_or(&0))))
        }

        fn destroy(&self, _state: &HelperState) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    #[test]
    fn test_dynamic_helper_recreated_when_definition_changes() {
        let created = Rc::new(Cell::new(0));
        let destroyed = Rc::new(Cell::new(0));
        let def = HelperDefinition::managed(
            "counter",
            Rc::new(Counter {
                created: created.clone(),
                destroyed: destroyed.clone(),
            }),
        );
        let definition = Reference::root(Value::Helper(def.clone()));
        let (reference, destroy) = dynamic_helper_ref(
            definition.clone(),
            Rc::new(CapturedArguments::empty()),
            Rc::new(Resolver::default()),
        );

        assert_eq!(value_for_ref(&reference).unwrap(), Value::from(1i64));
        assert_eq!(value_for_ref(&reference).unwrap(), Value::from(1i64));
        assert_eq!(created.get(), 1);

        // same definition, new revision: still re-created
        definition.set(Value::Null);
        definition.set(Value::Helper(def));
        assert_eq!(value_for_ref(&reference).unwrap(), Value::from(2i64));
        assert_eq!(destroyed.get(), 1);

        destroy();
        assert_eq!(destroyed.get(), 2);
    }

    #[test]
    fn test_unknown_dynamic_helper_names_the_path() {
        let (reference, _) = dynamic_helper_ref(
            Reference::constant("shout"),
            Rc::new(CapturedArguments::empty()),
            Rc::new(Resolver::default()),
        );
        assert_eq!(
            value_for_ref(&reference).unwrap_err(),
            RenderError::MissingHelper {
                path: "shout".to_string()
            }
        );
    }
}
