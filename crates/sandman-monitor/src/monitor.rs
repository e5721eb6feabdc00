//! # Automaton Monitor
//!
//! Advances each monitored process through the deterministic automaton as
//! its correlation-id events arrive, and kills it on the first event the
//! automaton does not allow.
//!
//! ## Transition Rule
//!
//! ```text
//! state(pid) = Final            ──▶ kill (AfterAcceptance)
//! (state(pid), id) not in table ──▶ kill (UndefinedTransition)
//! (state(pid), id) -> (n, 1)    ──▶ state(pid) = Final
//! (state(pid), id) -> (n, 0)    ──▶ state(pid) = n
//! ```
//!
//! A pid seen for the first time starts at state 0. A violation kills the
//! pid while its entry is still locked and then removes the entry, so
//! another event from the same pid waits for the kill instead of
//! restarting at state 0.
//!
//! ## Security Notes
//!
//! - A monitor can only be built from a frozen table, so it never runs
//!   against a partially loaded policy
//! - An empty table kills on the first event
//! - A full process table kills new pids instead of letting them run
//!   unmonitored
//!
//! ## Example
//!
//! ```rust
//! use std::io;
//! use sandman_monitor::{
//!     AutomatonMonitor, MonitorConfig, Outcome, ProcessKiller, ProcessState, TransitionRecord,
//!     TransitionTable,
//! };
//!
//! struct NoopKiller;
//! impl ProcessKiller for NoopKiller {
//!     fn kill(&self, _pid: u32) -> io::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let table = TransitionTable::from_records([
//!     TransitionRecord::new(0, 5, 1, false),
//!     TransitionRecord::new(1, 7, 2, true),
//! ])?;
//! let monitor = AutomatonMonitor::new(table, NoopKiller, MonitorConfig::new());
//! monitor.attach()?;
//!
//! assert!(matches!(monitor.observe(100, 5), Outcome::Advanced { .. }));
//! assert!(matches!(monitor.observe(100, 7), Outcome::Advanced { .. }));
//! assert_eq!(monitor.state_of(100), Some(ProcessState::Final));
//! assert!(matches!(monitor.observe(100, 5), Outcome::Killed(_)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::signal::{ProcessKiller, SignalKiller};
use crate::store::{ProcessState, ProcessTable, TransitionTable, UpdateRejected, DEFAULT_CAPACITY};

/// Configuration for [`AutomatonMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Maximum number of processes tracked at once.
    pub process_capacity: usize,
}

impl MonitorConfig {
    /// Defaults: 10,240 tracked processes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            process_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Sets the process table capacity.
    #[must_use]
    pub const fn with_process_capacity(mut self, capacity: usize) -> Self {
        self.process_capacity = capacity;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a process was killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// No transition from `state` on `input`.
    UndefinedTransition {
        /// State the process was in.
        state: u32,
        /// Offending correlation id.
        input: u32,
    },
    /// Any event after an accepting transition.
    AfterAcceptance {
        /// Offending correlation id.
        input: u32,
    },
    /// A new pid arrived while the process table was full.
    ProcessTableFull {
        /// Configured capacity.
        capacity: usize,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedTransition { state, input } => {
                write!(f, "no transition from state {state} on input {input}")
            }
            Self::AfterAcceptance { input } => write!(f, "input {input} after acceptance"),
            Self::ProcessTableFull { capacity } => {
                write!(f, "process table full ({capacity} entries)")
            }
        }
    }
}

/// A policy violation and what was done about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Offending process.
    pub pid: u32,
    /// What it did.
    pub kind: ViolationKind,
    /// Whether the kill signal was delivered.
    pub signal_delivered: bool,
}

/// Result of observing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The process moved along a defined transition.
    Advanced {
        /// State before the event.
        from: ProcessState,
        /// State after the event.
        to: ProcessState,
    },
    /// The process violated the policy and was killed.
    Killed(Violation),
    /// The monitor is detached; the event was dropped.
    Ignored,
}

impl Outcome {
    /// Returns true if the event was a violation.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Killed(_))
    }
}

/// Point-in-time monitor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    /// Whether events are being enforced.
    pub attached: bool,
    /// Transitions in the loaded table.
    pub transitions: usize,
    /// Processes with live state.
    pub tracked_processes: usize,
    /// Events observed while attached.
    pub events: u64,
    /// Violations raised.
    pub violations: u64,
}

/// Per-process automaton enforcement over a frozen transition table.
///
/// # Thread Safety
///
/// `AutomatonMonitor` is `Send + Sync`; share it through an `Arc` and call
/// [`observe`](Self::observe) from any number of threads. Events for one
/// pid are applied one at a time in arrival order.
#[derive(Debug)]
pub struct AutomatonMonitor<K = SignalKiller> {
    table: TransitionTable,
    processes: ProcessTable,
    killer: K,
    attached: AtomicBool,
    events: AtomicU64,
    violations: AtomicU64,
}

impl AutomatonMonitor<SignalKiller> {
    /// Monitor that kills with `SIGKILL`.
    pub fn with_signals(table: TransitionTable, config: MonitorConfig) -> Self {
        Self::new(table, SignalKiller, config)
    }
}

impl<K: ProcessKiller> AutomatonMonitor<K> {
    /// Creates a detached monitor.
    pub fn new(table: TransitionTable, killer: K, config: MonitorConfig) -> Self {
        Self {
            table,
            processes: ProcessTable::with_capacity(config.process_capacity),
            killer,
            attached: AtomicBool::new(false),
            events: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    /// Starts enforcing events.
    ///
    /// # Errors
    ///
    /// [`MonitorError::AlreadyAttached`] if already attached.
    pub fn attach(&self) -> Result<()> {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MonitorError::AlreadyAttached)?;
        info!("monitor attached ({} transitions)", self.table.len());
        Ok(())
    }

    /// Stops enforcing events. Tracked per-process state is kept.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotAttached`] if not attached.
    pub fn detach(&self) -> Result<()> {
        self.attached
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MonitorError::NotAttached)?;
        info!(
            "monitor detached ({} events, {} violations)",
            self.events.load(Ordering::Relaxed),
            self.violations.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Returns true while events are enforced.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Applies one correlation-id event from `pid`.
    pub fn observe(&self, pid: u32, input: u32) -> Outcome {
        if !self.is_attached() {
            debug!("pid {} input {} ignored: monitor detached", pid, input);
            return Outcome::Ignored;
        }
        self.events.fetch_add(1, Ordering::Relaxed);

        let step = |state: ProcessState| match state {
            ProcessState::Final => Err(ViolationKind::AfterAcceptance { input }),
            ProcessState::At(current) => self
                .table
                .lookup(current, input)
                .map(|t| {
                    if t.is_final {
                        ProcessState::Final
                    } else {
                        ProcessState::At(t.next_state)
                    }
                })
                .ok_or(ViolationKind::UndefinedTransition {
                    state: current,
                    input,
                }),
        };

        // The kill is delivered while the pid's entry is still held, so a
        // later event from the same pid cannot restart it at state 0 first.
        let reject = |rejected: UpdateRejected<ViolationKind>| {
            let kind = match rejected {
                UpdateRejected::Step(kind) => kind,
                UpdateRejected::Full => ViolationKind::ProcessTableFull {
                    capacity: self.processes.capacity(),
                },
            };
            self.kill(pid, kind)
        };

        match self.processes.update_or_reject(pid, step, reject) {
            Ok((from, to)) => {
                debug!("pid {}: {} --{}--> {}", pid, from, input, to);
                Outcome::Advanced { from, to }
            }
            Err(violation) => Outcome::Killed(violation),
        }
    }

    fn kill(&self, pid: u32, kind: ViolationKind) -> Violation {
        self.violations.fetch_add(1, Ordering::Relaxed);
        let signal_delivered = match self.killer.kill(pid) {
            Ok(()) => {
                warn!("killed pid {}: {}", pid, kind);
                true
            }
            Err(e) => {
                warn!("pid {} violated policy ({}) but kill failed: {}", pid, kind, e);
                false
            }
        };
        Violation {
            pid,
            kind,
            signal_delivered,
        }
    }

    /// Drops the state of a process that terminated.
    pub fn process_exited(&self, pid: u32) -> Option<ProcessState> {
        let state = self.processes.remove(pid);
        if let Some(state) = state {
            debug!("pid {} exited in state {}", pid, state);
        }
        state
    }

    /// Current state of `pid`, if it has sent an event.
    pub fn state_of(&self, pid: u32) -> Option<ProcessState> {
        self.processes.get(pid)
    }

    /// Loaded transition table.
    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Snapshot of the counters.
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            attached: self.is_attached(),
            transitions: self.table.len(),
            tracked_processes: self.processes.len(),
            events: self.events.load(Ordering::Relaxed),
            violations: self.violations.load(Ordering::Relaxed),
        }
    }
}
