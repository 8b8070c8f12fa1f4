use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use trellis_config::{ConfigLoader, RenderConfig};

mod commands;
mod demo;

use commands::render::{Mode, RenderArgs};

/// Trellis template VM driver.
///
/// Renders a built-in demo page against JSON data, optionally rerendering it
/// against changed data, and prints the resulting HTML.
///
/// EXAMPLES:
///     trellis render --data page.json                      Render fresh DOM
///     trellis render --data a.json --update b.json --stats Rerender and report
///     trellis render --data page.json --mode serialize     Server markup
///     trellis render --data page.json --mode rehydrate --markup page.html
///     trellis disassemble                                  Dump the opcode heap
///
/// ENVIRONMENT VARIABLES:
///     TRELLIS_LOG                 Log filter (overridden by --log)
///     TRELLIS_STACK_CAPACITY      Initial evaluation stack capacity
///     TRELLIS_DEBUG_RENDER_TREE   Record the debug render tree
///     TRELLIS_ALWAYS_REVALIDATE   Disable cache-group skips on rerender
#[derive(Parser)]
#[command(name = "trellis")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Log filter, e.g. "trellis_runtime=debug"
    #[arg(long, global = true)]
    log: Option<String>,

    /// Project config file (defaults to the nearest trellis.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the demo page
    ///
    /// EXAMPLES:
    ///     trellis render --data page.json
    ///     trellis render --data a.json --update b.json --stats
    #[command(visible_alias = "r")]
    Render {
        /// JSON file used as `this`
        #[arg(long, short = 'd')]
        data: PathBuf,
        /// JSON file to swap in before a rerender pass
        #[arg(long, short = 'u')]
        update: Option<PathBuf>,
        /// How the initial render builds its output
        #[arg(long, short = 'm', value_enum, default_value = "fresh")]
        mode: Mode,
        /// Server markup to adopt (with --mode rehydrate)
        #[arg(long)]
        markup: Option<PathBuf>,
        /// Print reconciliation statistics as JSON
        #[arg(long)]
        stats: bool,
        /// Print the debug render tree as JSON
        #[arg(long)]
        debug_tree: bool,
    },

    /// Print the demo program's opcodes
    Disassemble,
}

fn load_config(path: Option<&PathBuf>) -> Result<RenderConfig> {
    let mut loader = ConfigLoader::new();
    let config = match path {
        Some(path) => loader
            .load_from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => loader.load_from_directory(&std::env::current_dir()?)?,
    };
    Ok(config.render())
}

/// `--log` wins over `TRELLIS_LOG`, which the config loader already folded in
fn init_tracing(flag: Option<&str>, config: &RenderConfig) {
    let filter = flag.unwrap_or(&config.log_filter);
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(cli.log.as_deref(), &config);

    match cli.command {
        Commands::Render {
            data,
            update,
            mode,
            markup,
            stats,
            debug_tree,
        } => {
            let args = RenderArgs {
                data,
                update,
                mode,
                markup,
                stats,
                debug_tree,
            };
            commands::render::run(args, &config)?;
        }
        Commands::Disassemble => commands::disassemble::run()?,
    }

    Ok(())
}
