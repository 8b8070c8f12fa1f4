mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::rc::Rc;
use trellis_runtime::arguments::CapturedArguments;
use trellis_runtime::component::ComponentState;
use trellis_runtime::curry::CurriedKind;
use trellis_runtime::reference::value_for_ref;
use trellis_runtime::scope::DynamicScope;
use trellis_runtime::{
    Args, BuilderMode, ComponentCapabilities, ComponentDefinition, ComponentManager, Environment,
    Expr, HelperDefinition, ProgramBuilder, ProgramSymbolTable, Reference, RenderError,
    TemplateRef, Value,
};

fn empty_table() -> ProgramSymbolTable {
    ProgramSymbolTable::new::<&str>(&[], false)
}

/// Layout `<tag>{{@label}}</tag>`
fn label_layout(program: &mut ProgramBuilder, tag: &'static str) -> TemplateRef {
    program
        .template(ProgramSymbolTable::new(&["@label"], false), |e| {
            e.element(tag, |e| e.append(&Expr::local(1), false))
        })
        .unwrap()
}

/// Manager that records every lifecycle hook it receives
#[derive(Default)]
struct Recording {
    created: Counter,
    did_create: Counter,
    updates: Counter,
    destroyed: Counter,
}

impl ComponentManager for Recording {
    fn capabilities(&self) -> ComponentCapabilities {
        ComponentCapabilities {
            create_args: true,
            update_hook: true,
            create_instance: true,
            will_destroy: true,
            ..ComponentCapabilities::default()
        }
    }

    fn create(
        &self,
        args: Option<&CapturedArguments>,
        _dynamic_scope: Option<&DynamicScope>,
        _caller: Option<&Reference>,
        _has_default_block: bool,
    ) -> Result<ComponentState, RenderError> {
        assert!(args.and_then(|a| a.named("label")).is_some());
        self.created.bump();
        Ok(Rc::new(()))
    }

    fn update(
        &self,
        _state: &ComponentState,
        _dynamic_scope: Option<&DynamicScope>,
    ) -> Result<(), RenderError> {
        self.updates.bump();
        Ok(())
    }

    fn did_create(&self, _state: &ComponentState) {
        self.did_create.bump();
    }

    fn will_destroy(&self, _state: &ComponentState) {
        self.destroyed.bump();
    }
}

/// A helper whose value is whatever `source` currently holds
fn reading(name: &str, source: &Reference) -> HelperDefinition {
    let source = source.clone();
    HelperDefinition::function(name, move |_| value_for_ref(&source))
}

// -----------------------------------------------------------------------------
// Lifecycle
// -----------------------------------------------------------------------------

#[test]
fn test_sibling_change_does_not_update_component() {
    let a = Reference::root("A");
    let b = Reference::root("B");
    let manager = Rc::new(Recording::default());

    let mut program = ProgramBuilder::new();
    let layout = label_layout(&mut program, "span");
    let definition = ComponentDefinition::new("labelled", manager.clone(), Some(layout));
    let template = program
        .template(empty_table(), |e| {
            let args = Args::new().named("label", Expr::helper(reading("a", &a), Args::new()));
            e.invoke_component(definition.clone(), &args)?;
            e.element("em", |e| e.append(&Expr::helper(reading("b", &b), Args::new()), false))
        })
        .unwrap();

    let mut h = Harness::new(Environment::new(), program.build());
    let result = h.render(&template, &Reference::null(), BuilderMode::Fresh);
    assert_eq!(h.html(), "<span>A</span><em>B</em>");
    assert_eq!(manager.created.get(), 1);
    assert_eq!(manager.did_create.get(), 1);

    b.set("B2");
    h.rerender(&result);
    assert_eq!(h.html(), "<span>A</span><em>B2</em>");
    assert_eq!(manager.updates.get(), 0);

    a.set("A2");
    h.rerender(&result);
    assert_eq!(h.html(), "<span>A2</span><em>B2</em>");
    assert_eq!(manager.updates.get(), 1);

    result.destroy(&mut h.rt);
    assert_eq!(manager.destroyed.get(), 1);
}

#[test]
fn test_component_removed_with_its_branch() {
    let manager = Rc::new(Recording::default());
    let mut program = ProgramBuilder::new();
    let layout = label_layout(&mut program, "b");
    let definition = ComponentDefinition::new("labelled", manager.clone(), Some(layout));
    let template = program
        .template(empty_table(), |e| {
            e.if_(&Expr::this_path("show"), |e| {
                let args = Args::new().named("label", Expr::literal("on"));
                e.invoke_component(definition.clone(), &args)
            })
        })
        .unwrap();

    let mut h = Harness::new(Environment::new(), program.build());
    let this = root(json!({ "show": true }));
    let result = h.render(&template, &this, BuilderMode::Fresh);
    assert_eq!(h.html(), "<b>on</b>");

    this.set(json!({ "show": false }));
    h.rerender(&result);
    assert_eq!(h.html(), "<!---->");
    assert_eq!(manager.destroyed.get(), 1);
}

// -----------------------------------------------------------------------------
// Arguments and blocks
// -----------------------------------------------------------------------------

#[test]
fn test_template_only_component_reads_named_args() {
    let mut program = ProgramBuilder::new();
    let layout = label_layout(&mut program, "label");
    let definition = ComponentDefinition::template_only("field", layout);
    let template = program
        .template(empty_table(), |e| {
            let args = Args::new().named("label", Expr::this_path("title"));
            e.invoke_component(definition.clone(), &args)
        })
        .unwrap();

    let mut h = Harness::new(Environment::new(), program.build());
    let this = root(json!({ "title": "Name" }));
    let result = h.render(&template, &this, BuilderMode::Fresh);
    assert_eq!(h.html(), "<label>Name</label>");

    this.set(json!({ "title": "Email" }));
    h.rerender(&result);
    assert_eq!(h.html(), "<label>Email</label>");
}

#[test]
fn test_yield_passes_block_params() {
    let mut program = ProgramBuilder::new();
    let layout = program
        .template(ProgramSymbolTable::new(&["&default"], false), |e| {
            e.open_element("div");
            e.static_attr("class", "card", None);
            e.flush_element();
            e.yield_(1, &[Expr::literal("hi")])?;
            e.close_element();
            Ok(())
        })
        .unwrap();
    let card = ComponentDefinition::template_only("card", layout);
    let block = program
        .block(&[1], |e| {
            e.append(&Expr::local(1), false)?;
            e.text(", ");
            e.append(&Expr::this_path("name"), false)
        })
        .unwrap();
    let template = program
        .template(ProgramSymbolTable::new(&["greeting"], false), |e| {
            e.invoke_component(card.clone(), &Args::new().block("default", block.clone()))
        })
        .unwrap();

    let mut h = Harness::new(Environment::new(), program.build());
    let this = root(json!({ "name": "Ada" }));
    let result = h.render(&template, &this, BuilderMode::Fresh);
    insta::assert_snapshot!(h.html(), @r#"<div class="card">hi, Ada</div>"#);

    this.set(json!({ "name": "Grace" }));
    h.rerender(&result);
    assert_eq!(h.html(), r#"<div class="card">hi, Grace</div>"#);
}

// -----------------------------------------------------------------------------
// Dynamic and curried components
// -----------------------------------------------------------------------------

#[test]
fn test_dynamic_component_switches_definition() {
    let env = Environment::new();
    let mut program = ProgramBuilder::new();
    let bold = label_layout(&mut program, "b");
    let italic = label_layout(&mut program, "i");
    env.resolver()
        .register_component("bold", ComponentDefinition::template_only("bold", bold));
    env.resolver()
        .register_component("italic", ComponentDefinition::template_only("italic", italic));
    let template = program
        .template(empty_table(), |e| {
            let args = Args::new().named("label", Expr::literal("L"));
            e.dynamic_component(&Expr::this_path("which"), &args)
        })
        .unwrap();

    let mut h = Harness::new(env, program.build());
    let this = root(json!({ "which": "bold" }));
    let result = h.render(&template, &this, BuilderMode::Fresh);
    assert_eq!(h.html(), "<b>L</b>");

    this.set(json!({ "which": "italic" }));
    h.rerender(&result);
    assert_eq!(h.html(), "<i>L</i>");
}

#[test]
fn test_curried_component_carries_its_args() {
    let env = Environment::new();
    let mut program = ProgramBuilder::new();
    let layout = label_layout(&mut program, "span");
    env.resolver()
        .register_component("tag", ComponentDefinition::template_only("tag", layout));
    let template = program
        .template(empty_table(), |e| {
            let curried = Expr::curry(
                CurriedKind::Component,
                Expr::literal("tag"),
                Args::new().named("label", Expr::this_path("text")),
            );
            e.dynamic_component(&curried, &Args::new())
        })
        .unwrap();

    let mut h = Harness::new(env, program.build());
    let this = root(json!({ "text": "curried" }));
    h.render(&template, &this, BuilderMode::Fresh);
    assert_eq!(h.html(), "<span>curried</span>");
}

#[test]
fn test_unknown_component_name_is_reported() {
    let mut program = ProgramBuilder::new();
    let template = program
        .template(empty_table(), |e| e.dynamic_component(&Expr::literal("nope"), &Args::new()))
        .unwrap();

    let mut h = Harness::new(Environment::new(), program.build());
    let position = trellis_runtime::CursorPosition {
        element: h.container,
        next_sibling: None,
    };
    let err = trellis_runtime::render_main(
        &mut h.rt,
        &template,
        Reference::constant(Value::Null),
        position,
        BuilderMode::Fresh,
    )
    .unwrap_err();
    match err {
        RenderError::MissingComponent { path } => assert_eq!(path, "nope"),
        other => panic!("expected MissingComponent, got {:?}", other),
    }
}
