//! # Sandman Policy Analysis
//!
//! Derives a call-sequence policy from a program's control-flow graph and
//! instruments the program so the policy can be enforced at runtime.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`SymbolSet`] | Which callees are monitored |
//! | [`AutomatonBuilder`] | CFG walk emitting an [`Nfa`] over correlation ids |
//! | [`reduce`] | Epsilon-closure + subset construction into an [`Automaton`] |
//! | [`Injector`] | Inserts a correlation-id trap before each monitored call |
//!
//! ## Pipeline
//!
//! ```text
//! Module ──▶ AutomatonBuilder ──▶ Nfa ──▶ reduce ──▶ Automaton ──▶ table
//!   │                              │
//!   └────────── Injector ◀─────────┘ (call sites + ids)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use sandman_analysis::ir::{BasicBlock, Callee, Function, Instruction, Module, Terminator};
//! use sandman_analysis::{
//!     reduce, AutomatonBuilder, BuilderOptions, CorrelationIds, Injector, SymbolSet, TrapConfig,
//! };
//!
//! let symbols = SymbolSet::from_names(["open", "close"]);
//! let mut module = Module::new("demo", vec![Function::new(
//!     "main",
//!     vec![BasicBlock::new(
//!         "entry",
//!         vec![
//!             Instruction::call(Callee::function("open")),
//!             Instruction::call(Callee::function("close")),
//!         ],
//!         Terminator::Return,
//!     )],
//! )]);
//!
//! let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
//!     .build(&module, &mut CorrelationIds::default())?;
//! let dfa = reduce(&nfa);
//! Injector::new(&symbols, TrapConfig::new()).instrument(&mut module, nfa.call_sites())?;
//!
//! let end = dfa.run(&[1, 2]).unwrap();
//! assert!(dfa.is_accepting(end));
//! # Ok::<(), sandman_analysis::AnalysisError>(())
//! ```
//!
//! ## Security Notes
//!
//! - Correlation ids come from one monotonic counter; never reseed it
//! - Accepting states have no outgoing transitions (lockout)
//! - Indirect calls are invisible to the analysis

pub mod ir;

mod dfa;
mod error;
mod instrument;
mod nfa;
mod symbols;

pub use dfa::{epsilon_closure, move_on, reduce, Automaton, StateId, StateSet, Transition, START_STATE};
pub use error::{AnalysisError, Result};
pub use instrument::{InstrumentReport, Injector, TrapConfig, DEFAULT_TRAP_NUMBER, DEFAULT_TRAP_SYMBOL};
pub use nfa::{
    entry_state, exit_state, AutomatonBuilder, BuilderOptions, CorrelationId, CorrelationIds, Label,
    Nfa, StateName, DEFAULT_ENTRY_POINT,
};
pub use symbols::SymbolSet;
