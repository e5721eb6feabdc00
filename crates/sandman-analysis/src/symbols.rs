//! Monitored-symbol classification.
//!
//! The symbol list is read once at startup and then passed by value (or
//! shared reference) to the builder and the injector. There is no global
//! symbol state.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use crate::error::{AnalysisError, Result};
use crate::ir::Callee;

/// Immutable set of monitored symbol names.
///
/// # Example
///
/// ```rust
/// use sandman_analysis::{ir::Callee, SymbolSet};
///
/// let symbols = SymbolSet::from_names(["open", "read", "memset"]);
/// assert!(symbols.is_monitored("open"));
/// assert_eq!(symbols.resolve(&Callee::intrinsic("llvm.memset")), Some("memset"));
/// assert_eq!(symbols.resolve(&Callee::intrinsic("llvm.va_start")), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolSet {
    names: HashSet<String>,
}

impl SymbolSet {
    /// Builds a set from an iterator of names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Reads one symbol per line. Blank lines are ignored.
    pub fn from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
        let mut names = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
        Ok(Self { names })
    }

    /// Loads the symbol list from a file.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::SymbolList`] if the file is missing or
    /// unreadable. Callers treat this as fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let to_error = |source| AnalysisError::SymbolList {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(to_error)?;
        let set = Self::from_reader(BufReader::new(file)).map_err(to_error)?;
        debug!("loaded {} monitored symbols from {}", set.len(), path.display());
        Ok(set)
    }

    /// Returns true if `name` is monitored.
    pub fn is_monitored(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Resolves a callee to the monitored symbol it stands for.
    ///
    /// Returns `None` when the callee is not monitored; for intrinsics the
    /// lookup uses the resolved base name.
    pub fn resolve<'a>(&self, callee: &'a Callee) -> Option<&'a str> {
        let name = callee.resolved_name();
        self.is_monitored(name).then_some(name)
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no symbol is monitored.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
