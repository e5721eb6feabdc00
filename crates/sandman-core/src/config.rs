//! Configuration types for Sandman.

use std::path::{Path, PathBuf};

use sandman_analysis::{BuilderOptions, CorrelationIds, TrapConfig, DEFAULT_ENTRY_POINT};
use sandman_monitor::{MonitorConfig, TableLoader, DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SandmanError;
use crate::Result;

/// Feed name meaning standard input.
pub const STDIN_FEED: &str = "-";

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandmanConfig {
    /// Policy construction settings.
    pub analysis: AnalysisConfig,

    /// Probe settings.
    pub instrument: InstrumentConfig,

    /// Enforcement settings.
    pub monitor: EnforceConfig,
}

/// Policy construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Monitored symbol list, one name per line.
    pub symbols_path: PathBuf,

    /// Function whose entry starts the automaton.
    pub entry_point: String,

    /// First correlation id handed out.
    pub first_correlation_id: u32,

    /// Treat calls to undefined, unmonitored functions as epsilon edges.
    pub transparent_declarations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            symbols_path: PathBuf::from("libc_functions.txt"),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            first_correlation_id: 1,
            transparent_declarations: false,
        }
    }
}

/// Probe settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Function each probe calls.
    pub trap_symbol: String,

    /// System call number passed as the probe's first argument.
    pub trap_number: i64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        let trap = TrapConfig::new();
        Self {
            trap_symbol: trap.symbol,
            trap_number: trap.number,
        }
    }
}

/// Enforcement settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforceConfig {
    /// Transition table file.
    pub table_path: PathBuf,

    /// Transition store capacity.
    pub transition_capacity: usize,

    /// Per-process store capacity.
    pub process_capacity: usize,

    /// Event feed path, or `-` for standard input.
    pub event_feed: String,
}

impl Default for EnforceConfig {
    fn default() -> Self {
        Self {
            table_path: PathBuf::from("nfa_table.dat"),
            transition_capacity: DEFAULT_CAPACITY,
            process_capacity: DEFAULT_CAPACITY,
            event_feed: STDIN_FEED.to_string(),
        }
    }
}

impl SandmanConfig {
    /// Reads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// - [`SandmanError::Io`] if the file cannot be read
    /// - [`SandmanError::ConfigParse`] if it is not valid TOML for this schema
    /// - [`SandmanError::Config`] if a value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SandmanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make compilation or enforcement meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.entry_point.trim().is_empty() {
            return Err(SandmanError::Config("analysis.entry_point is empty".into()));
        }
        if self.instrument.trap_symbol.trim().is_empty() {
            return Err(SandmanError::Config("instrument.trap_symbol is empty".into()));
        }
        if self.monitor.transition_capacity == 0 {
            return Err(SandmanError::Config(
                "monitor.transition_capacity must be positive".into(),
            ));
        }
        if self.monitor.process_capacity == 0 {
            return Err(SandmanError::Config(
                "monitor.process_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Builder options for the automaton builder.
    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions::new()
            .with_entry_point(self.analysis.entry_point.clone())
            .with_transparent_declarations(self.analysis.transparent_declarations)
    }

    /// Fresh correlation id counter.
    pub fn correlation_ids(&self) -> CorrelationIds {
        CorrelationIds::starting_at(self.analysis.first_correlation_id)
    }

    /// Probe configuration for the injector.
    pub fn trap(&self) -> TrapConfig {
        TrapConfig::new()
            .with_symbol(self.instrument.trap_symbol.clone())
            .with_number(self.instrument.trap_number)
    }

    /// Table loader sized for the transition store.
    pub fn table_loader(&self) -> TableLoader {
        TableLoader::new().with_capacity(self.monitor.transition_capacity)
    }

    /// Runtime monitor configuration.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new().with_process_capacity(self.monitor.process_capacity)
    }
}
