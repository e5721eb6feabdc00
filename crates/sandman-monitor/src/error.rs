//! Error types for the runtime monitor.
//!
//! Policy violations are not errors: the monitor reports them as
//! [`Outcome::Killed`](crate::Outcome::Killed) and keeps serving other
//! processes. The variants here cover configuration, resource and
//! lifecycle failures, all of which must stop enforcement from starting.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreFull;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors raised while loading a table or running the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The transition table file could not be opened or read.
    #[error("cannot read transition table {path}: {source}")]
    TableIo {
        /// Path of the table file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Reading the table stream failed partway through.
    #[error("transition table read error: {0}")]
    TableRead(#[source] std::io::Error),

    /// A well-formed record could not be installed in the store.
    ///
    /// The whole load is aborted; a partial table is never enforced.
    #[error("failed to install transition from line {line}: {source}")]
    Populate {
        /// 1-based line number of the record.
        line: usize,
        /// Why the store refused it.
        #[source]
        source: StoreFull,
    },

    /// Direct insertion into a full store.
    #[error(transparent)]
    StoreFull(#[from] StoreFull),

    /// `attach` on a monitor that is already attached.
    #[error("monitor already attached")]
    AlreadyAttached,

    /// `detach` (or an event loop) on a monitor that is not attached.
    #[error("monitor not attached")]
    NotAttached,

    /// Reading the event feed failed.
    #[error("event feed error: {0}")]
    EventFeed(#[source] std::io::Error),
}

impl MonitorError {
    /// Errno-style code for process exit status, when one exists.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::TableIo { source, .. } | Self::TableRead(source) | Self::EventFeed(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}
