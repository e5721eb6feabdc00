//! # Runtime Stores
//!
//! The monitor owns exactly two key-value stores.
//!
//! | Store | Key | Value | Contract |
//! |-------|-----|-------|----------|
//! | [`TransitionStore`] / [`TransitionTable`] | `(state, input_id)` | `(next_state, is_final)` | Written once by the loader, then frozen read-only |
//! | [`ProcessTable`] | pid | [`ProcessState`] | Concurrent read-modify-write, isolated per pid |
//!
//! Both are bounded. A full transition store aborts the load; a full
//! process table turns a new pid's first event into a violation.
//!
//! ## Concurrency
//!
//! [`TransitionTable`] is immutable and shared through an `Arc`, so
//! lookups take no lock. [`ProcessTable`] is a `DashMap`: each update runs
//! under the entry lock of its pid's shard, so events for different pids
//! never contend on a global lock and events for the same pid are applied
//! one at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::TransitionRecord;

/// Default capacity of both stores.
pub const DEFAULT_CAPACITY: usize = 10_240;

/// Canonical id of the start state.
pub const START_STATE: u32 = 0;

/// The transition store refused a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transition store full ({capacity} entries)")]
pub struct StoreFull {
    /// Configured capacity.
    pub capacity: usize,
}

/// Lookup key of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionKey {
    /// Current state.
    pub state: u32,
    /// Observed correlation id.
    pub input_id: u32,
}

/// Result of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionValue {
    /// Next state.
    pub next_state: u32,
    /// Reaching `next_state` means acceptance.
    pub is_final: bool,
}

/// Mutable transition store, populated by the loader.
///
/// Freeze it with [`freeze`](Self::freeze) once loading succeeded; only
/// the frozen [`TransitionTable`] is handed to the monitor.
#[derive(Debug, Clone)]
pub struct TransitionStore {
    entries: HashMap<TransitionKey, TransitionValue>,
    capacity: usize,
}

impl TransitionStore {
    /// Empty store with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Installs a record, overwriting an existing entry for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreFull`] if the key is new and the store is at capacity.
    pub fn insert(&mut self, record: TransitionRecord) -> Result<(), StoreFull> {
        let key = TransitionKey {
            state: record.current_state,
            input_id: record.input_id,
        };
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            return Err(StoreFull {
                capacity: self.capacity,
            });
        }
        self.entries.insert(
            key,
            TransitionValue {
                next_state: record.next_state,
                is_final: record.is_final,
            },
        );
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Makes the store read-only.
    pub fn freeze(self) -> TransitionTable {
        TransitionTable {
            entries: Arc::new(self.entries),
        }
    }
}

impl Default for TransitionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

/// Frozen, shareable transition table.
///
/// # Example
///
/// ```rust
/// use sandman_monitor::{TransitionRecord, TransitionTable};
///
/// let table = TransitionTable::from_records([
///     TransitionRecord::new(0, 5, 1, false),
///     TransitionRecord::new(1, 7, 2, true),
/// ])?;
/// assert_eq!(table.len(), 2);
/// assert!(table.lookup(1, 7).is_some_and(|t| t.is_final));
/// assert!(table.lookup(0, 7).is_none());
/// # Ok::<(), sandman_monitor::StoreFull>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    entries: Arc<HashMap<TransitionKey, TransitionValue>>,
}

impl TransitionTable {
    /// Table with no transitions; every event against it is a violation.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from records using the default capacity.
    pub fn from_records<I>(records: I) -> Result<Self, StoreFull>
    where
        I: IntoIterator<Item = TransitionRecord>,
    {
        let mut store = TransitionStore::default();
        for record in records {
            store.insert(record)?;
        }
        Ok(store.freeze())
    }

    /// Looks up the transition for `(state, input_id)`.
    pub fn lookup(&self, state: u32, input_id: u32) -> Option<TransitionValue> {
        self.entries
            .get(&TransitionKey { state, input_id })
            .copied()
    }

    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no transitions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where a process is in the automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// At a canonical state.
    At(u32),
    /// An accepting transition fired; no further event is legal.
    Final,
}

impl ProcessState {
    /// State of a process seen for the first time.
    pub const START: Self = Self::At(START_STATE);
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(state) => write!(f, "{state}"),
            Self::Final => f.write_str("FINAL"),
        }
    }
}

/// Why an update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRejected<E> {
    /// The transition function rejected the event.
    Step(E),
    /// The pid is new and the table is at capacity.
    Full,
}

/// Bounded per-process state store keyed by pid.
#[derive(Debug)]
pub struct ProcessTable {
    states: DashMap<u32, ProcessState>,
    len: AtomicUsize,
    capacity: usize,
}

impl ProcessTable {
    /// Empty table with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: DashMap::new(),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Applies `step` to the pid's state atomically with respect to other
    /// events for the same pid.
    ///
    /// An absent pid starts at [`ProcessState::START`]. On success the new
    /// state is stored and `(from, to)` returned. On rejection the pid's
    /// entry is removed.
    pub fn update<E, F>(
        &self,
        pid: u32,
        step: F,
    ) -> Result<(ProcessState, ProcessState), UpdateRejected<E>>
    where
        F: FnOnce(ProcessState) -> Result<ProcessState, E>,
    {
        self.update_or_reject(pid, step, |rejected| rejected)
    }

    /// Like [`update`](Self::update), but runs `reject` on a refused event
    /// while the pid's entry is still locked and, when it exists, still
    /// present.
    ///
    /// Events for the same pid arriving concurrently wait until `reject`
    /// returns, so none of them can observe the pid as absent and restart
    /// it at [`ProcessState::START`] before `reject` has acted. `reject`
    /// must not call back into this table.
    pub fn update_or_reject<E, V, F, R>(
        &self,
        pid: u32,
        step: F,
        reject: R,
    ) -> Result<(ProcessState, ProcessState), V>
    where
        F: FnOnce(ProcessState) -> Result<ProcessState, E>,
        R: FnOnce(UpdateRejected<E>) -> V,
    {
        match self.states.entry(pid) {
            Entry::Occupied(mut entry) => {
                let from = *entry.get();
                match step(from) {
                    Ok(to) => {
                        entry.insert(to);
                        Ok((from, to))
                    }
                    Err(e) => {
                        let rejected = reject(UpdateRejected::Step(e));
                        entry.remove();
                        self.len.fetch_sub(1, Ordering::AcqRel);
                        Err(rejected)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let from = ProcessState::START;
                let to = match step(from) {
                    Ok(to) => to,
                    Err(e) => return Err(reject(UpdateRejected::Step(e))),
                };
                if !self.reserve_slot() {
                    return Err(reject(UpdateRejected::Full));
                }
                entry.insert(to);
                Ok((from, to))
            }
        }
    }

    fn reserve_slot(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    /// Current state of `pid`, if tracked.
    pub fn get(&self, pid: u32) -> Option<ProcessState> {
        self.states.get(&pid).map(|state| *state)
    }

    /// Drops `pid`'s entry. Returns the state it had.
    pub fn remove(&self, pid: u32) -> Option<ProcessState> {
        let (_, state) = self.states.remove(&pid)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(state)
    }

    /// Number of tracked processes.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if no process is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
