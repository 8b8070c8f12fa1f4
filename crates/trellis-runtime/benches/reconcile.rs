//! List reconciliation benchmarks
//!
//! Renders a keyed list once, then measures rerenders that:
//! - change nothing
//! - rotate the list by one
//! - reverse the list
//! - replace every other item

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_runtime::{
    render_main, BuilderMode, CursorPosition, Document, Environment, Expr, ProgramBuilder,
    ProgramSymbolTable, Reference, RenderResult, Runtime, RuntimeOptions, Value,
};

struct Fixture {
    rt: Runtime,
    result: RenderResult,
    this: Reference,
}

fn items(keys: impl Iterator<Item = usize>) -> Value {
    let items: Vec<serde_json::Value> = keys
        .map(|k| serde_json::json!({ "id": k, "label": format!("row {}", k) }))
        .collect();
    Value::from(serde_json::json!({ "items": items }))
}

/// `<ul>{{#each this.items key="id" as |item|}}<li>{{item.label}}</li>{{/each}}</ul>`
fn fixture(len: usize) -> Fixture {
    let mut program = ProgramBuilder::new();
    let template = program
        .template(ProgramSymbolTable::new(&["item"], false), |e| {
            e.element("ul", |e| {
                e.each(&Expr::this_path("items"), "id", Some(1), None, |e| {
                    e.element("li", |e| {
                        e.append(&Expr::path(Expr::local(1), "label"), false)
                    })
                })
            })
        })
        .expect("template assembles");

    let mut document = Document::new();
    let container = document.create_element("div");
    let mut rt = Runtime::new(
        Environment::new(),
        program.build(),
        document,
        RuntimeOptions::default(),
    );
    let this = Reference::root(items(0..len));
    let position = CursorPosition {
        element: container,
        next_sibling: None,
    };
    let result = render_main(&mut rt, &template, this.clone(), position, BuilderMode::Fresh)
        .expect("initial render");
    Fixture { rt, result, this }
}

// ============================================================================
// Rerender Benchmarks
// ============================================================================

fn bench_rerender_unchanged(c: &mut Criterion) {
    let mut f = fixture(1000);
    c.bench_function("rerender_unchanged_1000", |b| {
        b.iter(|| f.result.rerender(black_box(&mut f.rt)).expect("rerender"));
    });
}

fn bench_reorders(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_reorder");
    for len in [100usize, 1000] {
        let forward = items(0..len);
        let rotated = items((1..len).chain(0..1));
        let reversed = items((0..len).rev());

        for (name, changed) in [("rotate", rotated), ("reverse", reversed)] {
            let mut f = fixture(len);
            group.bench_with_input(BenchmarkId::new(name, len), &len, |b, _| {
                b.iter(|| {
                    f.this.set(changed.clone());
                    f.result.rerender(&mut f.rt).expect("rerender");
                    f.this.set(forward.clone());
                    f.result.rerender(&mut f.rt).expect("rerender");
                });
            });
        }
    }
    group.finish();
}

fn bench_replace_half(c: &mut Criterion) {
    let len = 1000;
    let original = items(0..len);
    let replaced = items((0..len).map(|k| if k % 2 == 0 { k } else { k + len }));
    let mut f = fixture(len);
    c.bench_function("replace_half_1000", |b| {
        b.iter(|| {
            f.this.set(replaced.clone());
            f.result.rerender(&mut f.rt).expect("rerender");
            f.this.set(original.clone());
            f.result.rerender(&mut f.rt).expect("rerender");
        });
    });
}

criterion_group!(benches, bench_rerender_unchanged, bench_reorders, bench_replace_half);
criterion_main!(benches);
