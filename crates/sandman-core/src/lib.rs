//! # Sandman Core
//!
//! Facades tying policy analysis and runtime enforcement together.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SANDMAN CORE                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   module.json ──▶ PolicyCompiler ──▶ instrumented module     │
//! │                        │                                     │
//! │                        ▼                                     │
//! │                  nfa_table.dat                               │
//! │                        │                                     │
//! │                        ▼                                     │
//! │   event feed  ──▶   Enforcer    ──▶ SIGKILL on violation     │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! | Facade | Wraps |
//! |--------|-------|
//! | [`PolicyCompiler`] | builder, reducer, injector, serializer |
//! | [`Enforcer`] | table loader, automaton monitor, event loop |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sandman_core::{read_module, Enforcer, PolicyCompiler, SandmanConfig};
//!
//! let config = SandmanConfig::load("sandman.toml")?;
//! let compiler = PolicyCompiler::from_config(config.clone())?;
//!
//! let mut module = read_module("main.json")?;
//! let policy = compiler.compile(&mut module)?;
//! policy.write_table(&config.monitor.table_path)?;
//!
//! let enforcer = Enforcer::from_config(&config)?;
//! enforcer.run(feed, tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```
//!
//! ## Security Notes
//!
//! - Configuration is validated before anything is compiled or loaded
//! - The table is loaded completely before the monitor attaches
//! - Violations are outcomes, not errors; enforcement continues for
//!   other processes

mod compiler;
mod config;
mod enforcer;
mod error;
mod serializer;

pub use compiler::{read_module, write_module, CompiledPolicy, PolicyCompiler, PolicySummary};
pub use config::{AnalysisConfig, EnforceConfig, InstrumentConfig, SandmanConfig, STDIN_FEED};
pub use enforcer::Enforcer;
pub use error::SandmanError;
pub use serializer::{records, render_table, write_table, TABLE_HEADER};

// Re-export component types for convenience
pub use sandman_analysis::{Automaton, SymbolSet};
pub use sandman_monitor::{
    BlockingLines, LoadReport, LoopStats, MonitorStatus, Outcome, ProcessKiller,
};

/// Core result type for sandman operations.
pub type Result<T> = std::result::Result<T, SandmanError>;
