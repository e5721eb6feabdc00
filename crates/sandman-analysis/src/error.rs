//! Error types for policy analysis.

use std::path::PathBuf;
use thiserror::Error;

use crate::ir::CallSite;

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors raised while building a policy or instrumenting a module.
///
/// All of these are configuration or input errors: they abort the
/// analysis before any policy is produced.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The monitored-symbol list could not be opened or read.
    #[error("cannot read monitored-symbol list {path}: {source}")]
    SymbolList {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The module does not define the entry-point function.
    #[error("entry point `{0}` is not defined in the module")]
    MissingEntryPoint(String),

    /// The correlation-id counter ran out of values.
    #[error("correlation ids exhausted after {last}")]
    IdsExhausted {
        /// Last id handed out.
        last: u32,
    },

    /// A tagged call site no longer addresses a call instruction.
    #[error("call site {0} is not a call instruction")]
    NotACall(CallSite),

    /// A tagged call site calls a symbol that is not monitored.
    #[error("call site {0} does not call a monitored symbol")]
    NotMonitored(CallSite),

    /// A tagged call site refers to a function or block the module lacks.
    #[error("call site {0} does not exist in the module")]
    UnknownCallSite(CallSite),
}
