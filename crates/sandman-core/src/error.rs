//! Error types for Sandman Core.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for sandman operations.
#[derive(Debug, Error)]
pub enum SandmanError {
    /// Configuration value out of range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for the schema.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// File I/O failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// Two compilation units define the same function.
    #[error("function {function} is defined in both {first} and {second}")]
    DuplicateDefinition {
        /// Function name.
        function: String,
        /// Unit that defined it first.
        first: String,
        /// Unit that defined it again.
        second: String,
    },

    /// Module JSON could not be read or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Analysis error passthrough.
    #[error("Analysis error: {0}")]
    Analysis(#[from] sandman_analysis::AnalysisError),

    /// Monitor error passthrough.
    #[error("Monitor error: {0}")]
    Monitor(#[from] sandman_monitor::MonitorError),
}

impl SandmanError {
    /// Errno of an underlying I/O failure, when there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            Self::Monitor(e) => e.raw_os_error(),
            Self::Analysis(sandman_analysis::AnalysisError::SymbolList { source, .. }) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}
