//! # Automaton Builder
//!
//! Walks every defined function of a module and emits a nondeterministic
//! automaton over monitored calls.
//!
//! ## State Naming
//!
//! | State | Meaning |
//! |-------|---------|
//! | `<fn>-entry` | Entry block of `fn` |
//! | `<fn>-<block>` | Any other block of `fn` |
//! | `<fn>-<block>_i<n>` | After the n-th monitored call in `<block>` |
//! | `<fn>-exit` | Function return |
//!
//! ## Edges
//!
//! - Monitored call: labeled edge with a fresh correlation id.
//! - Unmonitored call: epsilon edge into `<callee>-entry`; the block resumes
//!   from `<callee>-exit`. The callee's own states are stitched in when the
//!   callee itself is walked, so calls are inlined at the automaton level.
//! - Unmonitored intrinsic: ignored.
//! - Block end: epsilon edges to successor blocks, or to `<fn>-exit` when
//!   there are none.
//!
//! Correlation ids come from one [`CorrelationIds`] counter for the whole
//! build. Never reseed it between compilation units that end up in the
//! same program: ids must stay unique program-wide.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace};

use crate::error::{AnalysisError, Result};
use crate::ir::{BasicBlock, CallSite, Function, Module, Terminator};
use crate::symbols::SymbolSet;

/// Symbolic (construction-time) state name.
pub type StateName = String;

/// Per-call-site correlation id; the automaton's input symbol.
pub type CorrelationId = u32;

/// Default name of the program entry point.
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// Suffix of a function's entry state.
pub const ENTRY_SUFFIX: &str = "entry";

/// Suffix of a function's exit state.
pub const EXIT_SUFFIX: &str = "exit";

/// Entry state of a function.
pub fn entry_state(function: &str) -> StateName {
    format!("{function}-{ENTRY_SUFFIX}")
}

/// Exit state of a function.
pub fn exit_state(function: &str) -> StateName {
    format!("{function}-{EXIT_SUFFIX}")
}

/// Edge label: epsilon or a monitored call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    /// Traversable without consuming input.
    Epsilon,
    /// The monitored call with this correlation id fired.
    Call(CorrelationId),
}

/// Monotonic correlation-id allocator.
///
/// # Example
///
/// ```rust
/// use sandman_analysis::CorrelationIds;
///
/// let mut ids = CorrelationIds::starting_at(100);
/// assert_eq!(ids.next_id()?, 100);
/// assert_eq!(ids.next_id()?, 101);
/// assert_eq!(ids.peek(), Some(102));
/// # Ok::<(), sandman_analysis::AnalysisError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationIds {
    next: Option<CorrelationId>,
}

impl CorrelationIds {
    /// Allocator whose first id is `first`.
    pub const fn starting_at(first: CorrelationId) -> Self {
        Self { next: Some(first) }
    }

    /// Hands out the next id.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::IdsExhausted`] once `u32::MAX` was issued.
    pub fn next_id(&mut self) -> Result<CorrelationId> {
        let id = self.next.ok_or(AnalysisError::IdsExhausted { last: u32::MAX })?;
        self.next = id.checked_add(1);
        Ok(id)
    }

    /// The id the next call to [`next_id`](Self::next_id) returns.
    pub fn peek(&self) -> Option<CorrelationId> {
        self.next
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Nondeterministic automaton over monitored calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nfa {
    transitions: BTreeMap<StateName, BTreeMap<Label, BTreeSet<StateName>>>,
    start: StateName,
    accepting: BTreeSet<StateName>,
    call_sites: BTreeMap<CallSite, CorrelationId>,
}

impl Nfa {
    /// Empty automaton with the given start state.
    pub fn new(start: impl Into<StateName>) -> Self {
        Self {
            transitions: BTreeMap::new(),
            start: start.into(),
            accepting: BTreeSet::new(),
            call_sites: BTreeMap::new(),
        }
    }

    /// Adds an edge.
    pub fn add_transition(
        &mut self,
        from: impl Into<StateName>,
        label: Label,
        to: impl Into<StateName>,
    ) {
        self.transitions
            .entry(from.into())
            .or_default()
            .entry(label)
            .or_default()
            .insert(to.into());
    }

    /// Adds an epsilon edge.
    pub fn add_epsilon(&mut self, from: impl Into<StateName>, to: impl Into<StateName>) {
        self.add_transition(from, Label::Epsilon, to);
    }

    /// Marks a state as accepting.
    pub fn accept(&mut self, state: impl Into<StateName>) {
        self.accepting.insert(state.into());
    }

    /// Start state.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Accepting states.
    pub fn accepting(&self) -> &BTreeSet<StateName> {
        &self.accepting
    }

    /// Returns true if `state` accepts.
    pub fn is_accepting(&self, state: &str) -> bool {
        self.accepting.contains(state)
    }

    /// Destinations of `state` under `label`.
    pub fn targets(&self, state: &str, label: Label) -> Option<&BTreeSet<StateName>> {
        self.transitions.get(state)?.get(&label)
    }

    /// Iterates over every edge as `(from, label, to)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, Label, &str)> {
        self.transitions.iter().flat_map(|(from, by_label)| {
            by_label.iter().flat_map(move |(label, targets)| {
                targets.iter().map(move |to| (from.as_str(), *label, to.as_str()))
            })
        })
    }

    /// Every non-epsilon label in the automaton.
    pub fn alphabet(&self) -> BTreeSet<CorrelationId> {
        self.edges()
            .filter_map(|(_, label, _)| match label {
                Label::Call(id) => Some(id),
                Label::Epsilon => None,
            })
            .collect()
    }

    /// Number of distinct states mentioned by edges, start or accept set.
    pub fn state_count(&self) -> usize {
        let mut states: BTreeSet<&str> = BTreeSet::new();
        states.insert(&self.start);
        states.extend(self.accepting.iter().map(String::as_str));
        for (from, _, to) in self.edges() {
            states.insert(from);
            states.insert(to);
        }
        states.len()
    }

    /// Monitored call sites and the ids they were tagged with.
    pub fn call_sites(&self) -> &BTreeMap<CallSite, CorrelationId> {
        &self.call_sites
    }
}

/// Builder knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderOptions {
    /// Function whose entry starts and whose exit accepts the automaton.
    pub entry_point: String,
    /// Add `entry -> exit` epsilon edges for callees the module only
    /// declares, so calls into opaque external code stay transparent.
    pub transparent_declarations: bool,
}

impl BuilderOptions {
    /// Defaults: entry point `main`, declarations left opaque.
    pub fn new() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            transparent_declarations: false,
        }
    }

    /// Sets the entry-point function.
    #[must_use]
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Enables or disables transparent declarations.
    #[must_use]
    pub fn with_transparent_declarations(mut self, enabled: bool) -> Self {
        self.transparent_declarations = enabled;
        self
    }
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits an [`Nfa`] from a module's control-flow graph.
///
/// # Example
///
/// ```rust
/// use sandman_analysis::ir::{BasicBlock, Callee, Function, Instruction, Module, Terminator};
/// use sandman_analysis::{AutomatonBuilder, BuilderOptions, CorrelationIds, Label, SymbolSet};
///
/// let symbols = SymbolSet::from_names(["open"]);
/// let module = Module::new("demo", vec![Function::new(
///     "main",
///     vec![BasicBlock::new(
///         "entry",
///         vec![Instruction::call(Callee::function("open"))],
///         Terminator::Return,
///     )],
/// )]);
///
/// let builder = AutomatonBuilder::new(&symbols, BuilderOptions::new());
/// let nfa = builder.build(&module, &mut CorrelationIds::starting_at(7))?;
///
/// assert!(nfa.targets("main-entry", Label::Call(7)).is_some());
/// assert!(nfa.is_accepting("main-exit"));
/// # Ok::<(), sandman_analysis::AnalysisError>(())
/// ```
#[derive(Debug, Clone)]
pub struct AutomatonBuilder<'a> {
    symbols: &'a SymbolSet,
    options: BuilderOptions,
}

impl<'a> AutomatonBuilder<'a> {
    /// Creates a builder over an injected symbol set.
    pub fn new(symbols: &'a SymbolSet, options: BuilderOptions) -> Self {
        Self { symbols, options }
    }

    /// Builder options.
    pub fn options(&self) -> &BuilderOptions {
        &self.options
    }

    /// Builds the automaton for `module`, drawing ids from `ids`.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::MissingEntryPoint`] if the entry function is not
    ///   defined in the module.
    /// - [`AnalysisError::IdsExhausted`] if the counter runs out.
    pub fn build(&self, module: &Module, ids: &mut CorrelationIds) -> Result<Nfa> {
        let entry_point = self.options.entry_point.as_str();
        if !module.defines(entry_point) {
            return Err(AnalysisError::MissingEntryPoint(entry_point.to_string()));
        }

        let mut nfa = Nfa::new(entry_state(entry_point));
        nfa.accept(exit_state(entry_point));

        for function in module.definitions() {
            debug!("walking {} ({} blocks)", function.name, function.blocks.len());
            for block in &function.blocks {
                self.walk_block(module, function, block, &mut nfa, ids)?;
            }
        }

        info!(
            "built NFA for {}: {} states, {} monitored call sites",
            module.name,
            nfa.state_count(),
            nfa.call_sites.len()
        );
        Ok(nfa)
    }

    fn walk_block(
        &self,
        module: &Module,
        function: &Function,
        block: &BasicBlock,
        nfa: &mut Nfa,
        ids: &mut CorrelationIds,
    ) -> Result<()> {
        let origin = block_state(function, &block.name);
        let mut current = origin.clone();
        let mut intermediates = 0usize;

        for (index, instruction) in block.instructions.iter().enumerate() {
            let Some(callee) = instruction.as_call() else {
                continue;
            };

            if let Some(symbol) = self.symbols.resolve(callee) {
                intermediates += 1;
                let id = ids.next_id()?;
                let next = format!("{origin}_i{intermediates}");
                trace!("{} --{}({})--> {}", current, symbol, id, next);
                nfa.add_transition(current, Label::Call(id), next.clone());
                nfa.call_sites
                    .insert(CallSite::new(&function.name, &block.name, index), id);
                current = next;
            } else if callee.is_intrinsic() {
                continue;
            } else {
                let name = callee.resolved_name();
                nfa.add_epsilon(current, entry_state(name));
                if self.options.transparent_declarations && !module.defines(name) {
                    nfa.add_epsilon(entry_state(name), exit_state(name));
                }
                current = exit_state(name);
            }
        }

        let successors = block.successors();
        if successors.is_empty() {
            let function_exit = exit_state(&function.name);
            if block.terminator == Terminator::Unreachable {
                nfa.accept(function_exit.clone());
            }
            nfa.add_epsilon(current, function_exit);
        } else {
            for successor in successors {
                nfa.add_epsilon(current.clone(), block_state(function, successor));
            }
        }
        Ok(())
    }
}

/// State of a block; the entry block is aliased to `<fn>-entry`.
fn block_state(function: &Function, block: &str) -> StateName {
    match function.entry_block() {
        Some(entry) if entry.name == block => entry_state(&function.name),
        _ => format!("{}-{}", function.name, block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Callee, Instruction};

    fn call(name: &str) -> Instruction {
        Instruction::call(Callee::function(name))
    }

    fn build(module: &Module, symbols: &[&str]) -> Nfa {
        let symbols = SymbolSet::from_names(symbols.iter().copied());
        AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(module, &mut CorrelationIds::default())
            .unwrap()
    }

    fn eps(nfa: &Nfa, from: &str) -> Vec<String> {
        nfa.targets(from, Label::Epsilon)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_monitored_calls_chain_intermediate_states() {
        let module = Module::new(
            "m",
            vec![Function::new(
                "main",
                vec![BasicBlock::new(
                    "entry",
                    vec![call("open"), Instruction::other("add"), call("read")],
                    Terminator::Return,
                )],
            )],
        );
        let nfa = build(&module, &["open", "read"]);

        assert!(nfa.targets("main-entry", Label::Call(1)).unwrap().contains("main-entry_i1"));
        assert!(nfa.targets("main-entry_i1", Label::Call(2)).unwrap().contains("main-entry_i2"));
        assert_eq!(eps(&nfa, "main-entry_i2"), ["main-exit"]);
        assert_eq!(nfa.call_sites().get(&CallSite::new("main", "entry", 0)), Some(&1));
        assert_eq!(nfa.call_sites().get(&CallSite::new("main", "entry", 2)), Some(&2));
    }

    #[test]
    fn test_unmonitored_call_inlines_callee() {
        let module = Module::new(
            "m",
            vec![
                Function::new(
                    "main",
                    vec![BasicBlock::new("entry", vec![call("helper")], Terminator::Return)],
                ),
                Function::new(
                    "helper",
                    vec![BasicBlock::new("entry", vec![call("open")], Terminator::Return)],
                ),
            ],
        );
        let nfa = build(&module, &["open"]);

        assert_eq!(eps(&nfa, "main-entry"), ["helper-entry"]);
        assert_eq!(eps(&nfa, "helper-exit"), ["main-exit"]);
        assert!(nfa.targets("helper-entry", Label::Call(1)).is_some());
        assert_eq!(eps(&nfa, "helper-entry_i1"), ["helper-exit"]);
    }

    #[test]
    fn test_unmonitored_intrinsic_is_transparent() {
        let module = Module::new(
            "m",
            vec![Function::new(
                "main",
                vec![BasicBlock::new(
                    "entry",
                    vec![
                        Instruction::call(Callee::intrinsic("llvm.va_start")),
                        Instruction::call(Callee::intrinsic("llvm.memset")),
                    ],
                    Terminator::Return,
                )],
            )],
        );
        let nfa = build(&module, &["memset"]);

        assert!(nfa.targets("main-entry", Label::Call(1)).is_some());
        assert!(eps(&nfa, "main-entry").is_empty());
        assert!(nfa.targets("va_start-entry", Label::Epsilon).is_none());
        assert_eq!(nfa.call_sites().len(), 1);
        assert!(nfa.call_sites().contains_key(&CallSite::new("main", "entry", 1)));
    }

    #[test]
    fn test_branches_and_unreachable_exit() {
        let module = Module::new(
            "m",
            vec![Function::new(
                "main",
                vec![
                    BasicBlock::new("entry", vec![], Terminator::cond("then", "else")),
                    BasicBlock::new("then", vec![call("abort")], Terminator::Unreachable),
                    BasicBlock::new("else", vec![], Terminator::Return),
                ],
            )],
        );
        let nfa = build(&module, &["abort"]);

        assert_eq!(eps(&nfa, "main-entry"), ["main-else", "main-then"]);
        assert_eq!(eps(&nfa, "main-then_i1"), ["main-exit"]);
        assert_eq!(eps(&nfa, "main-else"), ["main-exit"]);
        assert!(nfa.is_accepting("main-exit"));
    }

    #[test]
    fn test_unreachable_in_helper_marks_its_exit_accepting() {
        let module = Module::new(
            "m",
            vec![
                Function::new(
                    "main",
                    vec![BasicBlock::new("entry", vec![call("die")], Terminator::Return)],
                ),
                Function::new(
                    "die",
                    vec![BasicBlock::new("entry", vec![call("exit")], Terminator::Unreachable)],
                ),
            ],
        );
        let nfa = build(&module, &["exit"]);

        assert!(nfa.is_accepting("die-exit"));
        assert!(nfa.is_accepting("main-exit"));
    }

    #[test]
    fn test_missing_entry_point() {
        let module = Module::new("m", vec![Function::declaration("main")]);
        let symbols = SymbolSet::default();
        let err = AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(&module, &mut CorrelationIds::default())
            .unwrap_err();
        assert!(matches!(err, AnalysisError::MissingEntryPoint(name) if name == "main"));
    }

    #[test]
    fn test_custom_entry_point() {
        let module = Module::new(
            "m",
            vec![Function::new(
                "start",
                vec![BasicBlock::new("entry", vec![], Terminator::Return)],
            )],
        );
        let symbols = SymbolSet::default();
        let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new().with_entry_point("start"))
            .build(&module, &mut CorrelationIds::default())
            .unwrap();
        assert_eq!(nfa.start(), "start-entry");
        assert!(nfa.is_accepting("start-exit"));
    }

    #[test]
    fn test_transparent_declarations() {
        let module = Module::new(
            "m",
            vec![
                Function::new(
                    "main",
                    vec![BasicBlock::new("entry", vec![call("ext")], Terminator::Return)],
                ),
                Function::declaration("ext"),
            ],
        );
        let symbols = SymbolSet::default();

        let opaque = AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(&module, &mut CorrelationIds::default())
            .unwrap();
        assert!(opaque.targets("ext-entry", Label::Epsilon).is_none());

        let transparent = AutomatonBuilder::new(
            &symbols,
            BuilderOptions::new().with_transparent_declarations(true),
        )
        .build(&module, &mut CorrelationIds::default())
        .unwrap();
        assert_eq!(eps(&transparent, "ext-entry"), ["ext-exit"]);
    }

    #[test]
    fn test_ids_continue_across_modules() {
        let symbols = SymbolSet::from_names(["open"]);
        let module = Module::new(
            "m",
            vec![Function::new(
                "main",
                vec![BasicBlock::new("entry", vec![call("open")], Terminator::Return)],
            )],
        );
        let builder = AutomatonBuilder::new(&symbols, BuilderOptions::new());
        let mut ids = CorrelationIds::default();

        let first = builder.build(&module, &mut ids).unwrap();
        let second = builder.build(&module, &mut ids).unwrap();
        assert_eq!(first.alphabet().into_iter().collect::<Vec<_>>(), [1]);
        assert_eq!(second.alphabet().into_iter().collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn test_id_exhaustion() {
        let mut ids = CorrelationIds::starting_at(u32::MAX);
        assert_eq!(ids.next_id().unwrap(), u32::MAX);
        assert!(matches!(ids.next_id(), Err(AnalysisError::IdsExhausted { .. })));
    }
}
