//! The policy compiler facade.
//!
//! [`PolicyCompiler`] runs the static half of the pipeline on a program:
//! build the call automaton, reduce it, and instrument every compilation
//! unit with correlation-id probes.
//!
//! A compiler owns one correlation-id counter for its whole lifetime, so
//! ids never repeat across units or across calls on the same compiler.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use sandman_analysis::ir::{CallSite, Function, Module};
use sandman_analysis::{
    reduce, Automaton, AutomatonBuilder, CorrelationId, CorrelationIds, InstrumentReport,
    Injector, SymbolSet,
};
use sandman_monitor::TransitionRecord;
use serde::Serialize;
use tracing::info;

use crate::config::SandmanConfig;
use crate::error::SandmanError;
use crate::serializer;
use crate::Result;

/// Output of one compilation.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    /// Reduced automaton.
    pub automaton: Automaton,
    /// Correlation id of every monitored call site.
    pub call_sites: BTreeMap<CallSite, CorrelationId>,
    /// What instrumentation changed.
    pub instrumentation: InstrumentReport,
}

impl CompiledPolicy {
    /// Serialized transition records.
    pub fn records(&self) -> Vec<TransitionRecord> {
        serializer::records(&self.automaton)
    }

    /// Transition table text.
    pub fn render_table(&self) -> String {
        serializer::render_table(&self.automaton)
    }

    /// Writes the transition table to `path`.
    pub fn write_table(&self, path: impl AsRef<Path>) -> Result<()> {
        serializer::write_table(&self.automaton, path)
    }

    /// Counts for reporting.
    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            call_sites: self.call_sites.len(),
            states: self.automaton.state_count(),
            transitions: self.automaton.transition_count(),
            accepting: self.automaton.accepting().len(),
            probes: self.instrumentation.probes,
        }
    }
}

/// Size of a compiled policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    /// Monitored call sites.
    pub call_sites: usize,
    /// Canonical states.
    pub states: usize,
    /// Deterministic transitions.
    pub transitions: usize,
    /// Accepting states.
    pub accepting: usize,
    /// Probes inserted.
    pub probes: usize,
}

/// Compiles modules into enforceable policies.
///
/// # Example
///
/// ```rust
/// use sandman_analysis::ir::{BasicBlock, Callee, Function, Instruction, Module, Terminator};
/// use sandman_analysis::SymbolSet;
/// use sandman_core::{PolicyCompiler, SandmanConfig};
///
/// let compiler = PolicyCompiler::new(SandmanConfig::default(), SymbolSet::from_names(["open"]));
/// let mut module = Module::new("demo", vec![Function::new(
///     "main",
///     vec![BasicBlock::new("entry", vec![Instruction::call(Callee::function("open"))], Terminator::Return)],
/// )]);
///
/// let policy = compiler.compile(&mut module)?;
/// assert_eq!(policy.render_table().lines().nth(1), Some("0 1 1 1"));
/// # Ok::<(), sandman_core::SandmanError>(())
/// ```
#[derive(Debug)]
pub struct PolicyCompiler {
    config: SandmanConfig,
    symbols: SymbolSet,
    ids: Mutex<CorrelationIds>,
}

impl PolicyCompiler {
    /// Creates a compiler over an already loaded symbol set.
    pub fn new(config: SandmanConfig, symbols: SymbolSet) -> Self {
        let ids = Mutex::new(config.correlation_ids());
        Self {
            config,
            symbols,
            ids,
        }
    }

    /// Creates a compiler, loading the symbol list named in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the symbol list
    /// cannot be read.
    pub fn from_config(config: SandmanConfig) -> Result<Self> {
        config.validate()?;
        let symbols = SymbolSet::load(&config.analysis.symbols_path)?;
        Ok(Self::new(config, symbols))
    }

    /// Monitored symbols.
    pub fn symbols(&self) -> &SymbolSet {
        &self.symbols
    }

    /// The id the next monitored call site will receive.
    pub fn next_correlation_id(&self) -> Option<CorrelationId> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).peek()
    }

    /// Builds and reduces the policy for `module`, then instruments it.
    ///
    /// The automaton is built from the module as given; probes are
    /// inserted only after construction succeeded.
    pub fn compile(&self, module: &mut Module) -> Result<CompiledPolicy> {
        self.compile_units(std::slice::from_mut(module))
    }

    /// Builds one policy for a program split across several units.
    ///
    /// The units are linked by function name: a call in one unit to a
    /// function defined in another follows that definition. Each unit
    /// receives probes only for the call sites it defines. Ids are drawn
    /// from the compiler's counter, which only advances when the whole
    /// compilation succeeds.
    ///
    /// # Errors
    ///
    /// - [`SandmanError::DuplicateDefinition`] if two units define the
    ///   same function
    /// - [`SandmanError::Analysis`] if construction or instrumentation fails
    pub fn compile_units(&self, units: &mut [Module]) -> Result<CompiledPolicy> {
        let program = link(units)?;

        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let mut draft = ids.clone();
        let nfa = AutomatonBuilder::new(&self.symbols, self.config.builder_options())
            .build(&program, &mut draft)?;
        let automaton = reduce(&nfa);

        let injector = Injector::new(&self.symbols, self.config.trap());
        let mut instrumentation = InstrumentReport::default();
        for unit in units.iter_mut() {
            let sites: BTreeMap<CallSite, CorrelationId> = nfa
                .call_sites()
                .iter()
                .filter(|(site, _)| unit.defines(&site.function))
                .map(|(site, &id)| (site.clone(), id))
                .collect();
            let report = injector.instrument(unit, &sites)?;
            instrumentation.probes += report.probes;
            instrumentation.declared_trap |= report.declared_trap;
        }
        *ids = draft;

        let policy = CompiledPolicy {
            automaton,
            call_sites: nfa.call_sites().clone(),
            instrumentation,
        };
        let summary = policy.summary();
        info!(
            "compiled {}: {} call sites, {} states, {} transitions",
            program.name, summary.call_sites, summary.states, summary.transitions
        );
        Ok(policy)
    }
}

/// Merges units into one module: every definition, plus declarations no
/// unit defines.
fn link(units: &[Module]) -> Result<Module> {
    if let [unit] = units {
        return Ok(unit.clone());
    }

    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();
    let mut functions: Vec<Function> = Vec::new();
    for unit in units {
        for function in unit.definitions() {
            if let Some(first) = owners.insert(function.name.as_str(), unit.name.as_str()) {
                return Err(SandmanError::DuplicateDefinition {
                    function: function.name.clone(),
                    first: first.to_string(),
                    second: unit.name.clone(),
                });
            }
            functions.push(function.clone());
        }
    }

    let mut declared: BTreeSet<&str> = BTreeSet::new();
    for function in units.iter().flat_map(|u| u.functions.iter()) {
        if !function.is_definition()
            && !owners.contains_key(function.name.as_str())
            && declared.insert(function.name.as_str())
        {
            functions.push(function.clone());
        }
    }

    let name = units
        .iter()
        .map(|u| u.name.as_str())
        .collect::<Vec<_>>()
        .join("+");
    Ok(Module::new(name, functions))
}

/// Reads a module from a JSON file.
pub fn read_module(path: impl AsRef<Path>) -> Result<Module> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| SandmanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Writes a module to a JSON file.
pub fn write_module(module: &Module, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| SandmanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), module)?;
    Ok(())
}
