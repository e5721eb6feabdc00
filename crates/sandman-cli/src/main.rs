//! Sandman CLI - compile call-sequence policies and enforce them

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sandman_core::{
    read_module, write_module, BlockingLines, Enforcer, PolicyCompiler, SandmanConfig,
    SandmanError, STDIN_FEED,
};
use serde::Serialize;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandman")]
#[command(about = "Sandman - call-sequence policy compiler and runtime enforcer")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Build one policy for a program's modules, write its table and
    /// instrument every module
    Compile {
        /// Module JSON files making up the program
        #[arg(required = true)]
        modules: Vec<PathBuf>,
        /// Instrumented module output, single module only
        /// (default: <module>.instrumented.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Transition table output (default: monitor.table_path)
        #[arg(short, long)]
        table: Option<PathBuf>,
        /// Monitored symbol list (default: analysis.symbols_path)
        #[arg(short, long)]
        symbols: Option<PathBuf>,
    },
    /// Load a transition table and enforce it against an event feed
    Enforce {
        /// Transition table (default: monitor.table_path)
        #[arg(short, long)]
        table: Option<PathBuf>,
        /// Event feed path, `-` for stdin (default: monitor.event_feed)
        #[arg(short, long)]
        feed: Option<String>,
    },
    /// Check configuration validity and, optionally, a transition table
    Check {
        /// Transition table to load
        #[arg(short, long)]
        table: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct CheckReport {
    config: &'static str,
    transitions: Option<usize>,
    skipped_lines: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Errno of the underlying I/O failure when there is one, else 1.
fn exit_status(error: &anyhow::Error) -> u8 {
    error
        .chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<SandmanError>()
                .and_then(SandmanError::raw_os_error)
                .or_else(|| cause.downcast_ref::<std::io::Error>().and_then(|e| e.raw_os_error()))
        })
        .and_then(|code| u8::try_from(code).ok())
        .filter(|&code| code != 0)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compile {
            modules,
            output,
            table,
            symbols,
        } => compile(config, &modules, output, table, symbols),
        Commands::Enforce { table, feed } => enforce(config, table, feed).await,
        Commands::Check { table } => check(&config, table),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SandmanConfig> {
    match path {
        Some(path) => SandmanConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(SandmanConfig::default()),
    }
}

fn compile(
    mut config: SandmanConfig,
    module_paths: &[PathBuf],
    output: Option<PathBuf>,
    table: Option<PathBuf>,
    symbols: Option<PathBuf>,
) -> anyhow::Result<()> {
    if output.is_some() && module_paths.len() > 1 {
        anyhow::bail!("--output needs exactly one module; got {}", module_paths.len());
    }
    if let Some(symbols) = symbols {
        config.analysis.symbols_path = symbols;
    }
    let table = table.unwrap_or_else(|| config.monitor.table_path.clone());

    let compiler = PolicyCompiler::from_config(config).context("failed to set up compiler")?;
    let mut modules = module_paths
        .iter()
        .map(|path| {
            read_module(path).with_context(|| format!("failed to read module {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let policy = compiler
        .compile_units(&mut modules)
        .context("failed to compile program")?;

    policy.write_table(&table).context("failed to write transition table")?;
    for (module, path) in modules.iter().zip(module_paths) {
        let output = output
            .clone()
            .unwrap_or_else(|| path.with_extension("instrumented.json"));
        write_module(module, &output).context("failed to write instrumented module")?;
        info!("instrumented module written to {}", output.display());
    }

    println!("{}", serde_json::to_string_pretty(&policy.summary())?);
    Ok(())
}

async fn enforce(
    mut config: SandmanConfig,
    table: Option<PathBuf>,
    feed: Option<String>,
) -> anyhow::Result<()> {
    if let Some(table) = table {
        config.monitor.table_path = table;
    }
    let feed = feed.unwrap_or_else(|| config.monitor.event_feed.clone());

    let enforcer = Enforcer::from_config(&config).with_context(|| {
        format!(
            "failed to load transition table {}",
            config.monitor.table_path.display()
        )
    })?;
    let stats = if feed == STDIN_FEED {
        info!("reading events from stdin");
        let lines = BlockingLines::stdin().context("failed to start stdin reader")?;
        enforcer.run_blocking(lines, shutdown_signal()).await?
    } else {
        let file = tokio::fs::File::open(&feed)
            .await
            .with_context(|| format!("failed to open event feed {feed}"))?;
        info!("reading events from {}", feed);
        enforcer.run(BufReader::new(file), shutdown_signal()).await?
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("cannot listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
        _ = terminate => {}
    }
}

fn check(config: &SandmanConfig, table: Option<PathBuf>) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let mut report = CheckReport {
        config: "ok",
        transitions: None,
        skipped_lines: None,
    };
    if let Some(table) = table {
        let (loaded, load) = config
            .table_loader()
            .load(&table)
            .map_err(SandmanError::from)
            .with_context(|| format!("failed to load transition table {}", table.display()))?;
        report.transitions = Some(loaded.len());
        report.skipped_lines = Some(load.skipped.len());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
