//! Coherence engine CLI.
//!
//! This binary drives the memory system from the command line. It provides:
//! 1. **Trace replay:** Build a system from a JSON configuration, replay a textual access trace
//!    through it and print the statistics table (optionally exporting it as JSON).
//! 2. **Invariant check:** With `--check`, verify the global coherence invariants once the trace
//!    has drained.
//! 3. **Defaults:** Print the default configuration as a starting point for custom ones.

mod trace;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use cohsim_core::common::{CoherenceError, ConfigError, line_base, line_offset};
use cohsim_core::config::{DirectoryType, Protocol};
use cohsim_core::stats::StatsTable;
use cohsim_core::{Config, MemorySystem};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::trace::{TraceError, TraceOp};

#[derive(Parser, Debug)]
#[command(
    name = "cohsim",
    author,
    version,
    about = "Directory-based cache-coherence protocol engine",
    long_about = "Replay memory-access traces through a simulated MSI/MESI/MESIF hierarchy.\n\nTrace lines read `<core> <R|W|X|I> <addr> [len] [value]`.\n\nExamples:\n  cohsim defaults > machine.json\n  cohsim run --config machine.json --trace app.trace\n  cohsim run --trace app.trace --protocol msi --check --stats-json stats.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay an access trace and print statistics.
    Run {
        /// JSON configuration; built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Access trace to replay.
        #[arg(short, long)]
        trace: PathBuf,

        /// Override the coherence protocol (`msi`, `mesi`, `mesif`).
        #[arg(long)]
        protocol: Option<Protocol>,

        /// Override the directory type (`full_map`, `limited_no_broadcast`, `limited_broadcast`).
        #[arg(long)]
        directory_type: Option<DirectoryType>,

        /// Override the core count.
        #[arg(long)]
        cores: Option<usize>,

        /// Also write the statistics table as JSON.
        #[arg(long)]
        stats_json: Option<PathBuf>,

        /// Verify the coherence invariants after the trace drains.
        #[arg(long)]
        check: bool,

        /// Log protocol activity at debug level.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the default configuration as JSON.
    Defaults,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("trace op {index}: {detail}")]
    BadAccess { index: usize, detail: String },

    #[error("coherence check failed: {0}")]
    Check(#[from] CoherenceError),

    #[error("cannot write {}: {source}", path.display())]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

struct RunArgs {
    config: Option<PathBuf>,
    trace: PathBuf,
    protocol: Option<Protocol>,
    directory_type: Option<DirectoryType>,
    cores: Option<usize>,
    stats_json: Option<PathBuf>,
    check: bool,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            trace,
            protocol,
            directory_type,
            cores,
            stats_json,
            check,
            verbose,
        } => {
            init_tracing(verbose);
            cmd_run(&RunArgs {
                config,
                trace,
                protocol,
                directory_type,
                cores,
                stats_json,
                check,
            })
        }
        Commands::Defaults => cmd_defaults(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

/// Installs the fmt subscriber; `RUST_LOG` wins over the default level.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_defaults() -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(&Config::default())?);
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<Config, CliError> {
    let mut config = args
        .config
        .as_deref()
        .map_or_else(|| Ok(Config::default()), Config::from_file)?;
    if let Some(protocol) = args.protocol {
        config.directory.protocol = protocol;
    }
    if let Some(kind) = args.directory_type {
        config.directory.kind = kind;
    }
    if let Some(cores) = args.cores {
        config.general.num_cores = cores;
    }
    config.validate()?;
    Ok(config)
}

/// Builds the system, replays the trace and reports.
fn cmd_run(args: &RunArgs) -> Result<(), CliError> {
    let config = load_config(args)?;
    let ops = trace::parse(BufReader::new(File::open(&args.trace).map_err(TraceError::from)?))?;
    info!(
        ops = ops.len(),
        cores = config.general.num_cores,
        protocol = ?config.directory.protocol,
        "replaying {}",
        args.trace.display()
    );

    let mut system = MemorySystem::new(&config)?;
    let mut where_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_latency = 0u64;
    for (index, op) in ops.iter().enumerate() {
        check_access(&system, index, op)?;
        let line = system.line_size();
        let mut data = op.payload();
        let result = system.access(
            op.core,
            op.port,
            op.op,
            line_base(op.address, line),
            line_offset(op.address, line),
            &mut data,
            true,
        );
        debug!(
            index,
            address = format_args!("{:#x}", op.address),
            hit = %result.hit_where,
            latency = result.latency,
            "access"
        );
        *where_counts.entry(result.hit_where.to_string()).or_default() += 1;
        total_latency += result.latency;
    }

    if args.check {
        system.verify_coherence()?;
        println!("coherence check passed");
    }

    println!("Accesses: {}  Total latency: {total_latency} cycles", ops.len());
    for (hit_where, count) in &where_counts {
        println!("  {hit_where:<12} {count}");
    }

    let mut table = StatsTable::new();
    system.report(&mut table);
    table.print();
    if let Some(path) = &args.stats_json {
        write_output(path, &table.to_json()?)?;
    }
    Ok(())
}

/// Rejects trace accesses the engine would treat as protocol violations.
fn check_access(system: &MemorySystem, index: usize, op: &TraceOp) -> Result<(), CliError> {
    let bad = |detail: String| CliError::BadAccess { index, detail };
    if op.core >= system.num_cores() {
        return Err(bad(format!("core {} out of range ({} cores)", op.core, system.num_cores())));
    }
    if line_offset(op.address, system.line_size()) + op.len > system.line_size() {
        return Err(bad(format!("{}-byte access at {:#x} crosses a line", op.len, op.address)));
    }
    Ok(())
}

fn write_output(path: &Path, text: &str) -> Result<(), CliError> {
    fs::write(path, text).map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })
}
