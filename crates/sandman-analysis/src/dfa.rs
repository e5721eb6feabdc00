//! # Automaton Reducer
//!
//! Turns the builder's [`Nfa`] into a deterministic [`Automaton`] by
//! epsilon-closure and subset construction.
//!
//! The runtime monitor keeps exactly one state per process, so the
//! deterministic automaton is the only form that can be enforced: a
//! nondeterministic one would need a state *set* per process.
//!
//! ## Algorithm
//!
//! 1. Start from `closure({start})`, canonical id 0
//! 2. A canonical state accepts iff its subset meets the NFA accept set
//! 3. For each unprocessed, non-accepting subset `S` and each symbol `a`
//!    of the alphabet, compute `T = closure(move(S, a))`; skip empty `T`
//! 4. Give every newly seen `T` the next canonical id and queue it
//!
//! Accepting subsets are never expanded. That is the lockout policy: once
//! the program reaches an accepting state no further monitored call is
//! legal. Because the lockout is applied during exploration, every
//! canonical state is reachable from the start and ids stay contiguous.
//!
//! ## References
//!
//! - Rabin, M. O.; Scott, D. (1959). "Finite Automata and Their Decision
//!   Problems". *IBM Journal of Research and Development*, 3(2), 114-125.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::info;

use crate::nfa::{CorrelationId, Label, Nfa, StateName};

/// Canonical (runtime) state id.
pub type StateId = u32;

/// A set of symbolic states.
pub type StateSet = BTreeSet<StateName>;

/// Canonical id of the start state.
pub const START_STATE: StateId = 0;

/// States reachable from `states` through epsilon edges alone.
///
/// Closure is idempotent: the closure of a closure is itself.
///
/// # Example
///
/// ```rust
/// use sandman_analysis::{epsilon_closure, Nfa, StateSet};
///
/// let mut nfa = Nfa::new("a");
/// nfa.add_epsilon("a", "b");
/// nfa.add_epsilon("b", "a");
///
/// let closure = epsilon_closure(&nfa, &StateSet::from(["a".to_string()]));
/// assert_eq!(closure.len(), 2);
/// assert_eq!(epsilon_closure(&nfa, &closure), closure);
/// ```
pub fn epsilon_closure(nfa: &Nfa, states: &StateSet) -> StateSet {
    let mut closure = states.clone();
    let mut worklist: VecDeque<&str> = states.iter().map(String::as_str).collect();

    while let Some(state) = worklist.pop_front() {
        let Some(targets) = nfa.targets(state, Label::Epsilon) else {
            continue;
        };
        for target in targets {
            if closure.insert(target.clone()) {
                worklist.push_back(target);
            }
        }
    }
    closure
}

/// Union of the `symbol` successors of every state in `states`.
pub fn move_on(nfa: &Nfa, states: &StateSet, symbol: CorrelationId) -> StateSet {
    states
        .iter()
        .filter_map(|state| nfa.targets(state, Label::Call(symbol)))
        .flatten()
        .cloned()
        .collect()
}

/// A deterministic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Transition {
    /// Source state.
    pub from: StateId,
    /// Input symbol.
    pub symbol: CorrelationId,
    /// Destination state.
    pub to: StateId,
}

/// Deterministic automaton over correlation ids.
///
/// The transition function is partial: a missing entry means no legal
/// transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Automaton {
    transitions: BTreeMap<(StateId, CorrelationId), StateId>,
    accepting: BTreeSet<StateId>,
    alphabet: BTreeSet<CorrelationId>,
    subsets: Vec<StateSet>,
}

impl Automaton {
    /// Start state (always [`START_STATE`]).
    pub fn start(&self) -> StateId {
        START_STATE
    }

    /// Accepting states.
    pub fn accepting(&self) -> &BTreeSet<StateId> {
        &self.accepting
    }

    /// Returns true if `state` accepts.
    pub fn is_accepting(&self, state: StateId) -> bool {
        self.accepting.contains(&state)
    }

    /// Input alphabet: every correlation id the NFA used.
    pub fn alphabet(&self) -> &BTreeSet<CorrelationId> {
        &self.alphabet
    }

    /// Next state on `symbol`, if defined.
    pub fn next(&self, state: StateId, symbol: CorrelationId) -> Option<StateId> {
        self.transitions.get(&(state, symbol)).copied()
    }

    /// Runs `word` from the start state; `None` on the first undefined step.
    pub fn run(&self, word: &[CorrelationId]) -> Option<StateId> {
        word.iter()
            .try_fold(self.start(), |state, &symbol| self.next(state, symbol))
    }

    /// Transitions ordered by `(from, symbol)`.
    pub fn transitions(&self) -> impl Iterator<Item = Transition> + '_ {
        self.transitions
            .iter()
            .map(|(&(from, symbol), &to)| Transition { from, symbol, to })
    }

    /// Number of transitions.
    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Number of canonical states.
    pub fn state_count(&self) -> usize {
        self.subsets.len()
    }

    /// NFA states behind a canonical state.
    pub fn subset(&self, state: StateId) -> Option<&StateSet> {
        self.subsets.get(state as usize)
    }
}

/// Determinizes `nfa` and applies the acceptance lockout.
///
/// # Example
///
/// ```rust
/// use sandman_analysis::{reduce, Label, Nfa};
///
/// let mut nfa = Nfa::new("main-entry");
/// nfa.add_transition("main-entry", Label::Call(5), "main-entry_i1");
/// nfa.add_epsilon("main-entry_i1", "main-exit");
/// nfa.accept("main-exit");
///
/// let dfa = reduce(&nfa);
/// let end = dfa.next(0, 5).unwrap();
/// assert!(dfa.is_accepting(end));
/// assert_eq!(dfa.transitions().filter(|t| t.from == end).count(), 0);
/// ```
pub fn reduce(nfa: &Nfa) -> Automaton {
    let alphabet = nfa.alphabet();
    let mut ids: BTreeMap<StateSet, StateId> = BTreeMap::new();
    let mut subsets: Vec<StateSet> = Vec::new();
    let mut transitions = BTreeMap::new();
    let mut worklist: VecDeque<StateId> = VecDeque::new();

    let mut accepting: BTreeSet<StateId> = BTreeSet::new();
    let accepts = |subset: &StateSet| subset.iter().any(|s| nfa.is_accepting(s));

    let start = epsilon_closure(nfa, &StateSet::from([nfa.start().to_string()]));
    ids.insert(start.clone(), START_STATE);
    subsets.push(start);
    worklist.push_back(START_STATE);

    while let Some(current) = worklist.pop_front() {
        if accepts(&subsets[current as usize]) {
            accepting.insert(current);
            continue;
        }
        for &symbol in &alphabet {
            let moved = move_on(nfa, &subsets[current as usize], symbol);
            if moved.is_empty() {
                continue;
            }
            let target = epsilon_closure(nfa, &moved);
            let next = match ids.get(&target) {
                Some(&id) => id,
                None => {
                    let id = subsets.len() as StateId;
                    ids.insert(target.clone(), id);
                    subsets.push(target);
                    worklist.push_back(id);
                    id
                }
            };
            transitions.insert((current, symbol), next);
        }
    }

    info!(
        "reduced NFA to {} canonical states, {} transitions, {} accepting",
        subsets.len(),
        transitions.len(),
        accepting.len()
    );

    Automaton {
        transitions,
        accepting,
        alphabet,
        subsets,
    }
}
