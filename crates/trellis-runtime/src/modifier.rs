//! Element modifiers
//!
//! A modifier is attached to an element while it is being constructed.
//! Installation is deferred until the render transaction commits, when the
//! element is in the document. Whatever the manager reads during `install`
//! or `update` becomes the instance's tag; the updating VM schedules another
//! `update` when that tag is invalidated.

use crate::arguments::CapturedArguments;
use crate::curry::{resolve_curried_value, CurriedKind};
use crate::dom::{Document, NodeId};
use crate::environment::Resolver;
use crate::error::RenderError;
use crate::validator::{create_updatable_tag, Tag};
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

pub type ModifierState = Rc<dyn Any>;

pub trait ModifierManager {
    fn create(&self, element: NodeId, args: &CapturedArguments) -> Result<ModifierState, RenderError>;

    fn install(&self, state: &ModifierState, document: &mut Document) -> Result<(), RenderError>;

    fn update(&self, state: &ModifierState, document: &mut Document) -> Result<(), RenderError>;

    fn destroy(&self, _state: &ModifierState) {}
}

struct ModifierInner {
    name: String,
    manager: Rc<dyn ModifierManager>,
}

#[derive(Clone)]
pub struct ModifierDefinition(Rc<ModifierInner>);

impl ModifierDefinition {
    pub fn new(name: impl Into<String>, manager: Rc<dyn ModifierManager>) -> Self {
        ModifierDefinition(Rc::new(ModifierInner {
            name: name.into(),
            manager,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn manager(&self) -> Rc<dyn ModifierManager> {
        self.0.manager.clone()
    }

    pub fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for ModifierDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModifierDefinition({})", self.0.name)
    }
}

/// A created modifier bound to its element
#[derive(Clone)]
pub struct ModifierInstance {
    pub definition: ModifierDefinition,
    pub state: ModifierState,
    pub element: NodeId,
    /// Follows whatever the last install or update consumed
    pub tag: Tag,
}

impl ModifierInstance {
    pub fn create(
        definition: ModifierDefinition,
        element: NodeId,
        args: &CapturedArguments,
    ) -> Result<Self, RenderError> {
        let state = definition.manager().create(element, args)?;
        Ok(Self {
            definition,
            state,
            element,
            tag: create_updatable_tag(),
        })
    }

    pub fn install(&self, document: &mut Document) -> Result<(), RenderError> {
        self.definition.manager().install(&self.state, document)
    }

    pub fn update(&self, document: &mut Document) -> Result<(), RenderError> {
        self.definition.manager().update(&self.state, document)
    }

    pub fn destroy(&self) {
        self.definition.manager().destroy(&self.state)
    }
}

impl fmt::Debug for ModifierInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ModifierInstance({} on node#{})",
            self.definition.name(),
            self.element.index()
        )
    }
}

/// Resolve a modifier-position value to a definition and its arguments
pub fn resolve_modifier_value(
    value: &Value,
    args: &CapturedArguments,
    resolver: &Resolver,
) -> Result<Option<(ModifierDefinition, CapturedArguments)>, RenderError> {
    match value {
        Value::Null => Ok(None),
        Value::Modifier(def) => Ok(Some((def.clone(), args.clone()))),
        Value::String(name) => Ok(Some((resolver.lookup_modifier(name)?, args.clone()))),
        Value::Curried(curried) if curried.kind() == CurriedKind::Modifier => {
            let resolved = resolve_curried_value(curried);
            let def = match &resolved.definition {
                Value::Modifier(def) => def.clone(),
                Value::String(name) => resolver.lookup_modifier(name)?,
                other => {
                    return Err(RenderError::MissingModifier {
                        path: other.to_text(),
                    })
                }
            };
            Ok(Some((def, resolved.merge(args))))
        }
        other => Err(RenderError::MissingModifier {
            path: other.to_text(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curry::CurriedValue;
    use crate::reference::{value_for_ref, Reference};

    struct SetTitle;

    impl ModifierManager for SetTitle {
        fn create(
            &self,
            element: NodeId,
            args: &CapturedArguments,
        ) -> Result<ModifierState, RenderError> {
            let title = args.positional(0).cloned().unwrap_or_else(Reference::null);
            Ok(Rc::new((element, title)))
        }

        fn install(&self, state: &ModifierState, document: &mut Document) -> Result<(), RenderError> {
            self.update(state, document)
        }

        fn update(&self, state: &ModifierState, document: &mut Document) -> Result<(), RenderError> {
            if let Some((element, title)) = state.downcast_ref::<(NodeId, Reference)>() {
                let text = value_for_ref(title)?.to_text();
                document.set_attribute(*element, "title", &text, None);
            }
            Ok(())
        }
    }

    #[test]
    fn test_install_writes_to_element() {
        let mut doc = Document::new();
        let div = doc.create_element("div");
        let def = ModifierDefinition::new("set-title", Rc::new(SetTitle));
        let args = CapturedArguments::new(vec![Reference::constant("hi")], vec![]);
        let instance = ModifierInstance::create(def, div, &args).unwrap();
        instance.install(&mut doc).unwrap();
        assert_eq!(doc.get_attribute(div, "title"), Some("hi"));
    }

    #[test]
    fn test_curried_modifier_prepends_arguments() {
        let def = ModifierDefinition::new("set-title", Rc::new(SetTitle));
        let curried = CurriedValue::new(
            CurriedKind::Modifier,
            Value::Modifier(def.clone()),
            Value::Null,
            Some(CapturedArguments::new(vec![Reference::constant("curried")], vec![])),
        );
        let (resolved, args) = resolve_modifier_value(
            &Value::Curried(Rc::new(curried)),
            &CapturedArguments::new(vec![Reference::constant("own")], vec![]),
            &Resolver::default(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(resolved.as_ptr(), def.as_ptr());
        assert_eq!(
            args.positional_values().unwrap(),
            vec![Value::from("curried"), Value::from("own")]
        );
    }

    #[test]
    fn test_non_modifier_value_is_missing() {
        let err = resolve_modifier_value(
            &Value::from(3i64),
            &CapturedArguments::empty(),
            &Resolver::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RenderError::MissingModifier {
                path: "3".to_string()
            }
        );
    }
}
