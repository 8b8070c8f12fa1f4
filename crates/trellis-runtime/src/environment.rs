//! Host environment
//!
//! The environment is what the embedding application supplies: named
//! definitions for string lookups, the truthiness rule used by `{{#if}}`,
//! and whether the render is interactive.

use crate::component::ComponentDefinition;
use crate::error::RenderError;
use crate::helper::HelperDefinition;
use crate::helpers;
use crate::modifier::ModifierDefinition;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Named definitions available to string lookups
#[derive(Default)]
pub struct Resolver {
    components: RefCell<HashMap<String, ComponentDefinition>>,
    helpers: RefCell<HashMap<String, HelperDefinition>>,
    modifiers: RefCell<HashMap<String, ModifierDefinition>>,
}

impl Resolver {
    pub fn register_component(&self, name: impl Into<String>, definition: ComponentDefinition) {
        self.components.borrow_mut().insert(name.into(), definition);
    }

    pub fn register_helper(&self, definition: HelperDefinition) {
        self.helpers
            .borrow_mut()
            .insert(definition.name().to_string(), definition);
    }

    pub fn register_modifier(&self, definition: ModifierDefinition) {
        self.modifiers
            .borrow_mut()
            .insert(definition.name().to_string(), definition);
    }

    pub fn lookup_component(&self, name: &str) -> Result<ComponentDefinition, RenderError> {
        self.components
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::MissingComponent {
                path: name.to_string(),
            })
    }

    pub fn lookup_helper(&self, name: &str) -> Result<HelperDefinition, RenderError> {
        self.helpers
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::MissingHelper {
                path: name.to_string(),
            })
    }

    pub fn lookup_modifier(&self, name: &str) -> Result<ModifierDefinition, RenderError> {
        self.modifiers
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RenderError::MissingModifier {
                path: name.to_string(),
            })
    }
}

pub struct Environment {
    pub resolver: Rc<Resolver>,
    pub to_bool: fn(&Value) -> bool,
    /// Modifiers are only created for interactive renders
    pub is_interactive: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An interactive environment with the built-in helpers registered
    pub fn new() -> Self {
        let resolver = Rc::new(Resolver::default());
        helpers::register_builtins(&resolver);
        Self {
            resolver,
            to_bool: Value::truthy,
            is_interactive: true,
        }
    }

    /// An environment for producing markup on a server; modifiers are skipped
    pub fn server() -> Self {
        Self {
            is_interactive: false,
            ..Self::new()
        }
    }

    pub fn resolver(&self) -> Rc<Resolver> {
        self.resolver.clone()
    }

    pub fn to_bool(&self, value: &Value) -> bool {
        (self.to_bool)(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_registered() {
        let env = Environment::new();
        assert!(env.resolver.lookup_helper("concat").is_ok());
        assert!(env.resolver.lookup_helper("hash").is_ok());
    }

    #[test]
    fn test_missing_lookup_names_the_path() {
        let env = Environment::new();
        let err = env.resolver.lookup_component("x-card").unwrap_err();
        assert_eq!(err.to_string(), "Could not find a component named \"x-card\"");
    }

    #[test]
    fn test_custom_truthiness() {
        fn strict(value: &Value) -> bool {
            matches!(value, Value::Bool(true))
        }
        let env = Environment {
            to_bool: strict,
            ..Environment::new()
        };
        assert!(!env.to_bool(&Value::from("yes")));
        assert!(env.to_bool(&Value::Bool(true)));
    }
}
