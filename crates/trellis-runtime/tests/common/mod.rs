//! Shared helpers for the rendering integration tests
//!
//! Most tests build a small program, render it into a detached `<div>` and
//! then compare that container's markup after mutating references.

#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use trellis_runtime::dom::html::parse_fragment;
use trellis_runtime::{
    render_main, BuilderMode, CursorPosition, Document, Environment, NodeId, Program, Reference,
    RenderResult, Runtime, RuntimeOptions, TemplateRef, Value,
};

/// A runtime plus the element everything gets rendered into
pub struct Harness {
    pub rt: Runtime,
    pub container: NodeId,
}

impl Harness {
    pub fn new(env: Environment, program: Program) -> Self {
        let mut document = Document::new();
        let container = document.create_element("div");
        Self {
            rt: Runtime::new(env, program, document, RuntimeOptions::default()),
            container,
        }
    }

    /// Like `new`, but with `markup` already parsed into the container
    pub fn with_markup(env: Environment, program: Program, markup: &str) -> Self {
        let mut harness = Self::new(env, program);
        let container = harness.container;
        let document = harness.rt.document_mut();
        let nodes = parse_fragment(document, markup, Some(container)).expect("markup parses");
        for node in nodes {
            document.append_child(container, node).expect("append parsed node");
        }
        harness
    }

    pub fn render(&mut self, template: &TemplateRef, this: &Reference, mode: BuilderMode) -> RenderResult {
        let position = CursorPosition {
            element: self.container,
            next_sibling: None,
        };
        render_main(&mut self.rt, template, this.clone(), position, mode).expect("initial render")
    }

    pub fn rerender(&mut self, result: &RenderResult) {
        result.rerender(&mut self.rt).expect("rerender");
    }

    /// Markup currently inside the container
    pub fn html(&self) -> String {
        self.rt.document().inner_html(self.container)
    }

    pub fn mutations(&self) -> u64 {
        self.rt.document().mutation_count()
    }
}

/// A root reference holding `json`
///
/// # Example
/// ```
/// let this = root(serde_json::json!({ "name": "Ada" }));
/// ```
pub fn root(json: serde_json::Value) -> Reference {
    Reference::root(Value::from(json))
}

/// Shared counter for lifecycle hooks
#[derive(Clone, Default)]
pub struct Counter(Rc<Cell<usize>>);

impl Counter {
    pub fn bump(&self) {
        self.0.set(self.0.get() + 1);
    }

    pub fn get(&self) -> usize {
        self.0.get()
    }
}
