mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use trellis_runtime::{
    BuilderMode, Environment, Expr, NodeId, ProgramBuilder, ProgramSymbolTable, TemplateRef,
};

/// `<section>{{#if this.show}}<p>{{this.a}}</p>{{/if}}</section>`
/// `<ul>{{#each this.items as |item|}}<li>{{item}}</li>{{/each}}</ul>`
/// `<footer>{{this.b}}</footer>`
fn page() -> (ProgramBuilder, TemplateRef) {
    let mut program = ProgramBuilder::new();
    let template = program
        .template(ProgramSymbolTable::new(&["item"], false), |e| {
            e.element("section", |e| {
                e.if_(&Expr::this_path("show"), |e| {
                    e.element("p", |e| e.append(&Expr::this_path("a"), false))
                })
            })?;
            e.element("ul", |e| {
                e.each(&Expr::this_path("items"), "@identity", Some(1), None, |e| {
                    e.element("li", |e| e.append(&Expr::local(1), false))
                })
            })?;
            e.element("footer", |e| e.append(&Expr::this_path("b"), false))
        })
        .unwrap();
    (program, template)
}

fn data() -> serde_json::Value {
    json!({ "show": true, "a": "A", "items": ["x", "y"], "b": "B" })
}

/// Markup a server render of `page()` produces for `data`
fn server_markup(data: serde_json::Value) -> String {
    let (program, template) = page();
    let mut server = Harness::new(Environment::server(), program.build());
    server.render(&template, &root(data), BuilderMode::Serialize);
    server.html()
}

fn fresh_html(data: serde_json::Value) -> String {
    let (program, template) = page();
    let mut fresh = Harness::new(Environment::new(), program.build());
    fresh.render(&template, &root(data), BuilderMode::Fresh);
    fresh.html()
}

fn element_children(h: &Harness) -> Vec<NodeId> {
    let doc = h.rt.document();
    doc.children(h.container)
        .into_iter()
        .filter(|node| doc.is_element(*node))
        .collect()
}

// -----------------------------------------------------------------------------
// Serialization
// -----------------------------------------------------------------------------

#[test]
fn test_server_markup_is_marked() {
    let markup = server_markup(data());
    assert!(markup.starts_with("<!--%+b:0%-->"), "{}", markup);
    assert!(markup.ends_with("<!--%-b:0%-->"), "{}", markup);
    assert!(markup.contains("<section>"));
}

// -----------------------------------------------------------------------------
// Rehydration
// -----------------------------------------------------------------------------

#[test]
fn test_rehydrated_markup_matches_a_fresh_render() {
    let markup = server_markup(data());
    let (program, template) = page();
    let mut client = Harness::with_markup(Environment::new(), program.build(), &markup);
    let adopted = element_children(&client);

    let this = root(data());
    let result = client.render(&template, &this, BuilderMode::Rehydrate);

    assert_eq!(client.html(), fresh_html(data()));
    assert_eq!(element_children(&client), adopted);

    let before = client.mutations();
    client.rerender(&result);
    assert_eq!(client.mutations(), before);
}

#[test]
fn test_rehydrated_output_stays_live() {
    let markup = server_markup(data());
    let (program, template) = page();
    let mut client = Harness::with_markup(Environment::new(), program.build(), &markup);
    let this = root(data());
    let result = client.render(&template, &this, BuilderMode::Rehydrate);

    let changed = json!({ "show": false, "a": "A", "items": ["y", "z"], "b": "C" });
    this.set(changed.clone());
    client.rerender(&result);
    assert_eq!(client.html(), fresh_html(changed));
}

#[test]
fn test_stale_text_is_patched() {
    let markup = server_markup(json!({ "show": true, "a": "server", "items": ["x"], "b": "B" }));
    let (program, template) = page();
    let mut client = Harness::with_markup(Environment::new(), program.build(), &markup);
    let client_data = json!({ "show": true, "a": "client", "items": ["x"], "b": "B" });
    client.render(&template, &root(client_data.clone()), BuilderMode::Rehydrate);

    assert_eq!(client.html(), fresh_html(client_data));
}

#[test]
fn test_mismatch_rebuilds_only_its_block() {
    let markup = server_markup(data())
        .replace("<p>", "<h1>")
        .replace("</p>", "</h1>");
    let (program, template) = page();
    let mut client = Harness::with_markup(Environment::new(), program.build(), &markup);
    let adopted = element_children(&client);

    client.render(&template, &root(data()), BuilderMode::Rehydrate);

    assert_eq!(client.html(), fresh_html(data()));
    // section, list and footer were all adopted
    assert_eq!(element_children(&client), adopted);
    let section = adopted[0];
    let doc = client.rt.document();
    assert_eq!(doc.inner_html(section), "<p>A</p>");
}

#[test]
fn test_removed_node_is_rebuilt_in_its_block() {
    // drop the second <li> from the server markup, keeping its block markers
    let markup = server_markup(data());
    let start = markup.match_indices("<li>").nth(1).map(|(i, _)| i).unwrap();
    let end = start + markup[start..].find("</li>").unwrap() + "</li>".len();
    let markup = format!("{}{}", &markup[..start], &markup[end..]);

    let (program, template) = page();
    let mut client = Harness::with_markup(Environment::new(), program.build(), &markup);
    let adopted = element_children(&client);
    let ul = adopted[1];
    let first_row = {
        let doc = client.rt.document();
        doc.children(ul).into_iter().find(|n| doc.is_element(*n)).unwrap()
    };

    let this = root(data());
    let result = client.render(&template, &this, BuilderMode::Rehydrate);

    assert_eq!(client.html(), fresh_html(data()));
    assert_eq!(element_children(&client), adopted);
    let rows: Vec<NodeId> = {
        let doc = client.rt.document();
        doc.children(ul).into_iter().filter(|n| doc.is_element(*n)).collect()
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], first_row);

    let before = client.mutations();
    client.rerender(&result);
    assert_eq!(client.mutations(), before);
}

#[test]
fn test_container_without_markers_is_rejected() {
    let (program, template) = page();
    let mut client = Harness::with_markup(Environment::new(), program.build(), "<p>plain</p>");
    let position = trellis_runtime::CursorPosition {
        element: client.container,
        next_sibling: None,
    };
    let result = trellis_runtime::render_main(
        &mut client.rt,
        &template,
        root(data()),
        position,
        BuilderMode::Rehydrate,
    );
    assert!(result.is_err());
}
