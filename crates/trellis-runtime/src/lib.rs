//! Trellis Runtime - template rendering VM
//!
//! This library provides the rendering machinery:
//! - A register/stack machine executing compiled template programs
//! - An append VM that builds DOM and records updating opcodes
//! - An updating VM that revalidates and patches the output incrementally
//! - Keyed list reconciliation and server-markup rehydration

/// Trellis runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod arguments;
pub mod attributes;
pub mod builder;
pub mod component;
pub mod curry;
pub mod debug_render_tree;
pub mod destroyable;
pub mod dom;
pub mod environment;
pub mod error;
pub mod helper;
pub mod helpers;
pub mod iterable;
mod list;
pub mod modifier;
pub mod opcodes;
pub mod program;
pub mod reference;
pub mod render;
pub mod runtime;
pub mod scope;
pub mod symbol_table;
pub mod update;
pub mod validator;
pub mod value;
pub mod vm;

pub use builder::{BuilderMode, CursorPosition};
pub use component::{ComponentCapabilities, ComponentDefinition, ComponentManager};
pub use dom::{Document, NodeId};
pub use environment::{Environment, Resolver};
pub use error::RenderError;
pub use helper::HelperDefinition;
pub use modifier::{ModifierDefinition, ModifierManager};
pub use program::{Args, Expr, Program, ProgramBuilder, TemplateRef};
pub use reference::Reference;
pub use render::{render_main, RenderResult};
pub use runtime::{ReconcileStats, Runtime, RuntimeOptions};
pub use symbol_table::{BlockSymbolTable, ProgramSymbolTable};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
