//! TileOpt Command Line Interface
//!
//! Usage:
//!   tileopt [OPTIONS] --input NAME=SHAPE... <input-file>
//!   tileopt --help
//!
//! Examples:
//!   tileopt matmul.tile -i A=f32:5x5 -i B=f32:5x5                # Access patterns of kernel 0
//!   tileopt matmul.tile -i A=5x5 -i B=5x5 --tile 2,2,2 --strict  # Tile first, reject partial tiles
//!   tileopt matmul.tile -i A=5x5 -i B=5x5 --emit ir              # Dump the lowered block tree

use clap::{Parser, ValueEnum};
use tileopt::{AnalysisConfig, ir::{RunInfo, TensorShape}, utils::PrettyPrint};
use std::path::PathBuf;
use std::fs;
use anyhow::{Result, Context, anyhow};
use log::{info, debug, error};

/// TileOpt - access pattern analysis for tensor loop nests
#[derive(Parser, Debug)]
#[command(name = "tileopt")]
#[command(version)]
#[command(about = "Access pattern analysis and tiling for tensor contractions", long_about = None)]
struct Cli {
    /// Input file holding one contraction function
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Input tensor shape, e.g. `A=f32:5x5` (repeatable)
    #[arg(short = 'i', long = "input", value_name = "NAME=SHAPE", value_parser = parse_binding)]
    inputs: Vec<(String, TensorShape)>,

    /// Output tensor shape, e.g. `C=f32:5x5` (repeatable)
    #[arg(long = "output-shape", value_name = "NAME=SHAPE", value_parser = parse_binding)]
    outputs: Vec<(String, TensorShape)>,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Program name
    #[arg(long, default_value = "program")]
    name: String,

    /// Position of the kernel to analyze inside `main`
    #[arg(short, long, default_value_t = 0)]
    kernel: usize,

    /// Tile sizes, one per kernel index (comma-separated)
    #[arg(short, long, value_delimiter = ',', num_args = 1..)]
    tile: Option<Vec<u64>>,

    /// Tensors to analyze (defaults to all refined by the kernel)
    #[arg(long = "tensor", value_name = "NAME")]
    tensors: Vec<String>,

    /// Fail if tiling leaves partial tiles on an accessed index
    #[arg(long)]
    strict: bool,

    /// What to emit
    #[arg(long, default_value = "access")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Access patterns as text
    Access,
    /// The (tiled) kernel block
    Ir,
    /// The full analysis report as JSON
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("TileOpt v{}", tileopt::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;

    let mut run_info = RunInfo::new(&source);
    for (name, shape) in &cli.inputs {
        run_info = run_info.with_input(name, shape.clone());
    }
    for (name, shape) in &cli.outputs {
        run_info = run_info.with_output(name, shape.clone());
    }

    info!("Lowering...");
    let program = tileopt::lower(&cli.name, &run_info)?;

    let config = build_config(&cli);
    debug!("Analysis config: {:?}", config);

    info!("Analyzing...");
    let report = match tileopt::analyze(&program, &config) {
        Ok(report) => report,
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            return Err(e);
        }
    };

    let output = match cli.emit {
        EmitKind::Access => report.to_string(),
        EmitKind::Ir => report.block.pretty(),
        EmitKind::Json => serde_json::to_string_pretty(&report)
            .context("Failed to serialize report")?,
    };
    write_output(&cli.output, &output)
}

/// Parse `NAME=SHAPE`.
fn parse_binding(s: &str) -> Result<(String, TensorShape)> {
    let (name, shape) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=SHAPE, got '{}'", s))?;
    let shape = shape
        .parse::<TensorShape>()
        .map_err(|e| anyhow!("invalid shape for {}: {}", name, e))?;
    Ok((name.trim().to_string(), shape))
}

fn build_config(cli: &Cli) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();

    // Override with CLI flags
    config.kernel = cli.kernel;
    if let Some(ref sizes) = cli.tile {
        config.tile_sizes = Some(sizes.clone());
    }
    if !cli.tensors.is_empty() {
        config.tensors = cli.tensors.clone();
    }
    config.strict_tiling = cli.strict;
    config.verbosity = cli.verbose;

    config
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
