use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use node_forge_tsl::compiler::{self, Dialect, NodeBuilderState, ShaderStage};
use node_forge_tsl::dsl;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "node-forge-tsl")]
#[command(about = "Compile JSON node graphs to WGSL or GLSL shaders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a graph document and write one shader file per stage
    Build {
        /// Graph document (JSON)
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Override the dialect named in the document's options
        #[arg(short, long, value_enum)]
        dialect: Option<DialectArg>,

        /// Directory for generated shaders (defaults to the input's directory)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Also write the build state (bindings, uniforms, varyings, update lists) as JSON
        #[arg(long, value_name = "FILE")]
        state_json: Option<PathBuf>,

        /// Run naga over every generated stage
        #[arg(long)]
        validate: bool,

        /// Log at debug level
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile a graph document without writing output
    Check {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, value_enum)]
        dialect: Option<DialectArg>,

        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DialectArg {
    Wgsl,
    Glsl,
}

impl From<DialectArg> for Dialect {
    fn from(d: DialectArg) -> Self {
        match d {
            DialectArg::Wgsl => Dialect::Wgsl,
            DialectArg::Glsl => Dialect::Glsl,
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A second init (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn compile_document(
    input: &Path,
    dialect: Option<DialectArg>,
    validate: bool,
) -> Result<NodeBuilderState> {
    let doc = dsl::load_graph_from_path(input)?;
    let (graph, request, mut options) = dsl::lower_document(&doc)
        .with_context(|| format!("failed to lower {}", input.display()))?;
    if let Some(d) = dialect {
        options.dialect = d.into();
    }
    options.validate |= validate;

    let start = Instant::now();
    let state = compiler::build(&graph, &request, &options)
        .with_context(|| format!("failed to compile {}", input.display()))?;
    info!(
        input = %input.display(),
        dialect = ?state.dialect(),
        nodes = graph.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "compiled"
    );
    Ok(state)
}

fn write_outputs(
    input: &Path,
    state: &NodeBuilderState,
    output_dir: Option<PathBuf>,
    state_json: Option<PathBuf>,
) -> Result<()> {
    let dir = output_dir
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create output dir {}", dir.display()))?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("graph");

    for stage in ShaderStage::ALL {
        let Some(source) = state.shader(stage) else {
            continue;
        };
        let path = dir.join(format!("{stem}.{stage}.{}", state.dialect().extension()));
        std::fs::write(&path, source)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(stage = %stage, path = %path.display(), "saved");
    }

    if let Some(path) = state_json {
        let text = serde_json::to_string_pretty(state)?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "saved build state");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            input,
            dialect,
            output_dir,
            state_json,
            validate,
            verbose,
        } => {
            init_logging(verbose);
            let state = compile_document(&input, dialect, validate)?;
            write_outputs(&input, &state, output_dir, state_json)?;
        }
        Commands::Check {
            input,
            dialect,
            verbose,
        } => {
            init_logging(verbose);
            let state = compile_document(&input, dialect, true)?;
            if state.update_nodes().is_empty() && state.uniforms().is_empty() {
                warn!("graph has no uniforms; its output is constant");
            }
            println!("{}: ok", input.display());
        }
    }
    Ok(())
}
