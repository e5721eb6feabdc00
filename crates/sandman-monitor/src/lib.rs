//! # Sandman Runtime Monitor
//!
//! Enforces a compiled call-sequence policy against running processes.
//!
//! The policy arrives as a transition table file. The loader turns it into
//! a frozen [`TransitionTable`]; the [`AutomatonMonitor`] then tracks one
//! automaton state per pid and kills any process whose next correlation id
//! has no transition.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`TransitionRecord`] | One `current input next final` table line |
//! | [`TableLoader`] | Table file into a frozen [`TransitionTable`] |
//! | [`ProcessTable`] | Bounded per-pid state, isolated per entry |
//! | [`AutomatonMonitor`] | Per-event transition and kill decision |
//! | [`run_event_loop`] | Async driver over a `<pid> <input>` event feed |
//! | [`BlockingLines`] | Feed lines read on a dedicated thread (stdin) |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::io::Cursor;
//! use sandman_monitor::{AutomatonMonitor, MonitorConfig, Outcome, TableLoader};
//!
//! let (table, report) = TableLoader::new().load_from_reader(Cursor::new("0 5 1 0\n1 7 2 1\n"))?;
//! assert_eq!(report.installed, 2);
//!
//! let monitor = AutomatonMonitor::with_signals(table, MonitorConfig::new());
//! monitor.attach()?;
//! assert!(matches!(monitor.observe(100, 5), Outcome::Advanced { .. }));
//! monitor.detach()?;
//! # Ok::<(), sandman_monitor::MonitorError>(())
//! ```
//!
//! ## Security Notes
//!
//! - A monitor only exists over a completely loaded table
//! - Unknown pids start at state 0; every later event must be allowed
//! - Nothing is allowed after an accepting transition

mod error;
mod events;
mod loader;
mod monitor;
mod record;
mod signal;
mod store;

pub use error::{MonitorError, Result};
pub use events::{
    run_blocking_feed, run_event_loop, BlockingLines, LoopStats, MonitorEvent, ParseEventError,
    EXIT_KEYWORD,
};
pub use loader::{LoadReport, SkippedLine, TableLoader};
pub use monitor::{AutomatonMonitor, MonitorConfig, MonitorStatus, Outcome, Violation, ViolationKind};
pub use record::{ParseRecordError, TransitionRecord, COMMENT_PREFIX, RECORD_FIELDS};
pub use signal::{ProcessKiller, SignalKiller};
pub use store::{
    ProcessState, ProcessTable, StoreFull, TransitionKey, TransitionStore, TransitionTable,
    TransitionValue, UpdateRejected, DEFAULT_CAPACITY, START_STATE,
};
