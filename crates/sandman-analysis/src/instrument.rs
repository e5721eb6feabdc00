//! # Instrumentation Injector
//!
//! Makes monitored call sites observable at runtime. Before every call
//! the builder tagged, the injector inserts a trap call carrying the
//! site's correlation id:
//!
//! ```text
//! call @syscall(i64 462, i64 <id>)   ; inserted probe
//! call @open(...)                    ; original call, untouched
//! ```
//!
//! The trap is a privileged event (a system call the monitor observes
//! from the kernel side), so the id cannot be forged by rewriting user
//! memory. The calling process id travels implicitly with the trap.
//!
//! ## Security Notes
//!
//! - Every tagged site is validated before the module is touched; a bad
//!   site leaves the module unmodified
//! - Nothing but the probe is inserted; the original call still runs

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::{AnalysisError, Result};
use crate::ir::{CallSite, Callee, Function, Instruction, Module, Operand};
use crate::nfa::CorrelationId;
use crate::symbols::SymbolSet;

/// Default trap symbol.
pub const DEFAULT_TRAP_SYMBOL: &str = "syscall";

/// Default trap number: an otherwise unused system call whose entry
/// tracepoint the monitor attaches to.
pub const DEFAULT_TRAP_NUMBER: i64 = 462;

/// How probes reach the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapConfig {
    /// Function the probe calls.
    pub symbol: String,
    /// First argument of the probe (the system call number).
    pub number: i64,
}

impl TrapConfig {
    /// `syscall(462, id)`.
    pub fn new() -> Self {
        Self {
            symbol: DEFAULT_TRAP_SYMBOL.to_string(),
            number: DEFAULT_TRAP_NUMBER,
        }
    }

    /// Sets the trap symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Sets the trap number.
    #[must_use]
    pub fn with_number(mut self, number: i64) -> Self {
        self.number = number;
        self
    }
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one instrumentation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentReport {
    /// Probes inserted.
    pub probes: usize,
    /// Whether a declaration for the trap symbol had to be added.
    pub declared_trap: bool,
}

/// Inserts correlation-id probes in front of monitored calls.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeMap;
/// use sandman_analysis::ir::{BasicBlock, CallSite, Callee, Function, Instruction, Module, Terminator};
/// use sandman_analysis::{Injector, SymbolSet, TrapConfig};
///
/// let symbols = SymbolSet::from_names(["open"]);
/// let mut module = Module::new("demo", vec![Function::new(
///     "main",
///     vec![BasicBlock::new("entry", vec![Instruction::call(Callee::function("open"))], Terminator::Return)],
/// )]);
/// let sites = BTreeMap::from([(CallSite::new("main", "entry", 0), 42)]);
///
/// let report = Injector::new(&symbols, TrapConfig::new()).instrument(&mut module, &sites)?;
/// assert_eq!(report.probes, 1);
/// assert_eq!(module.function("main").unwrap().blocks[0].instructions.len(), 2);
/// # Ok::<(), sandman_analysis::AnalysisError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Injector<'a> {
    symbols: &'a SymbolSet,
    trap: TrapConfig,
}

impl<'a> Injector<'a> {
    /// Creates an injector over an injected symbol set.
    pub fn new(symbols: &'a SymbolSet, trap: TrapConfig) -> Self {
        Self { symbols, trap }
    }

    /// The probe instruction for `id`.
    pub fn probe(&self, id: CorrelationId) -> Instruction {
        Instruction::call_with(
            Callee::function(self.trap.symbol.clone()),
            vec![Operand::Const(self.trap.number), Operand::Const(i64::from(id))],
        )
    }

    /// Inserts one probe before each call site in `sites`.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::UnknownCallSite`] if a site's function, block or
    ///   index does not exist
    /// - [`AnalysisError::NotACall`] if a site is not a call
    /// - [`AnalysisError::NotMonitored`] if a site calls an unmonitored
    ///   symbol
    ///
    /// On error the module is left unchanged.
    pub fn instrument(
        &self,
        module: &mut Module,
        sites: &BTreeMap<CallSite, CorrelationId>,
    ) -> Result<InstrumentReport> {
        for site in sites.keys() {
            self.validate(module, site)?;
        }

        let mut report = InstrumentReport::default();

        // Descending order keeps pending indices within a block valid.
        for (site, &id) in sites.iter().rev() {
            let block = module
                .functions
                .iter_mut()
                .find(|f| f.name == site.function)
                .and_then(|f| f.block_mut(&site.block))
                .ok_or_else(|| AnalysisError::UnknownCallSite(site.clone()))?;
            block.instructions.insert(site.index, self.probe(id));
            debug!("probe {} inserted before {}", id, site);
            report.probes += 1;
        }

        if report.probes > 0 && module.function(&self.trap.symbol).is_none() {
            module
                .functions
                .push(Function::declaration(self.trap.symbol.clone()));
            report.declared_trap = true;
        }

        info!("instrumented {}: {} probes", module.name, report.probes);
        Ok(report)
    }

    fn validate(&self, module: &Module, site: &CallSite) -> Result<()> {
        let instruction = module
            .function(&site.function)
            .and_then(|f| f.block(&site.block))
            .and_then(|b| b.instructions.get(site.index))
            .ok_or_else(|| AnalysisError::UnknownCallSite(site.clone()))?;
        let callee = instruction
            .as_call()
            .ok_or_else(|| AnalysisError::NotACall(site.clone()))?;
        if self.symbols.resolve(callee).is_none() {
            return Err(AnalysisError::NotMonitored(site.clone()));
        }
        Ok(())
    }
}
