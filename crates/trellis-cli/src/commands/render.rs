//! Render command - render the demo page and optionally rerender it

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use trellis_config::RenderConfig;
use trellis_runtime::dom::html::parse_fragment;
use trellis_runtime::{
    render_main, BuilderMode, CursorPosition, Document, Environment, Reference, Runtime,
    RuntimeOptions, Value,
};

use super::read_json;
use crate::demo;

/// How the initial render builds its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Build new DOM
    Fresh,
    /// Build new DOM with rehydration markers, as a server would
    Serialize,
    /// Adopt server markup given with --markup
    Rehydrate,
}

#[derive(Debug)]
pub struct RenderArgs {
    pub data: PathBuf,
    pub update: Option<PathBuf>,
    pub mode: Mode,
    pub markup: Option<PathBuf>,
    pub stats: bool,
    pub debug_tree: bool,
}

pub fn run(args: RenderArgs, config: &RenderConfig) -> Result<()> {
    let mut mode = args.mode;
    if mode == Mode::Rehydrate && !config.rehydration {
        warn!("rehydration is disabled in configuration; rendering fresh");
        mode = Mode::Fresh;
    }

    let env = match mode {
        Mode::Serialize => Environment::server(),
        Mode::Fresh | Mode::Rehydrate => Environment::new(),
    };
    let demo = demo::build(&env)?;

    let mut document = Document::new();
    let container = document.create_element("div");
    if mode == Mode::Rehydrate {
        let Some(path) = &args.markup else {
            bail!("--mode rehydrate needs --markup <FILE>");
        };
        let markup = fs::read_to_string(path)
            .with_context(|| format!("Failed to read markup file: {}", path.display()))?;
        for node in parse_fragment(&mut document, &markup, Some(container))? {
            document.append_child(container, node)?;
        }
    }

    let mut options = RuntimeOptions::from(config);
    options.debug_render_tree |= args.debug_tree;
    let mut rt = Runtime::new(env, demo.program, document, options);

    let this = Reference::root(Value::from(read_json(&args.data)?));
    let position = CursorPosition {
        element: container,
        next_sibling: None,
    };
    let builder_mode = match mode {
        Mode::Fresh => BuilderMode::Fresh,
        Mode::Serialize => BuilderMode::Serialize,
        Mode::Rehydrate => BuilderMode::Rehydrate,
    };
    let result = render_main(&mut rt, &demo.template, this.clone(), position, builder_mode)
        .context("Initial render failed")?;
    println!("{}", rt.document().inner_html(container));

    let initial_mutations = rt.document().mutation_count();
    if let Some(update) = &args.update {
        this.set(Value::from(read_json(update)?));
        result.rerender(&mut rt).context("Rerender failed")?;
        println!("{}", rt.document().inner_html(container));
        info!(
            mutations = rt.document().mutation_count() - initial_mutations,
            "rerendered"
        );
    }

    if args.stats {
        let stats = rt.stats;
        let report = serde_json::json!({
            "mutations": rt.document().mutation_count() - initial_mutations,
            "syncs": stats.syncs,
            "retained": stats.retained,
            "moved": stats.moved,
            "inserted": stats.inserted,
            "deleted": stats.deleted,
            "live_opcodes": rt.live_opcodes(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if args.debug_tree {
        let tree = rt.debug_render_tree()?;
        println!("{}", serde_json::to_string_pretty(&tree)?);
    }

    Ok(())
}
