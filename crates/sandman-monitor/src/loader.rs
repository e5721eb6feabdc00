//! # Table Loader
//!
//! Reads a transition table file into a frozen [`TransitionTable`].
//!
//! ## Behavior
//!
//! | Line | Action |
//! |------|--------|
//! | blank or `#`-comment | ignored |
//! | four `u32` fields | installed (duplicate keys overwrite) |
//! | anything else | skipped with a warning, counted in [`LoadReport`] |
//!
//! Lines are decoded lossily, so a line that is not valid UTF-8 is just
//! another malformed line rather than a failed load.
//!
//! A well-formed record the store refuses aborts the whole load, so a
//! partially populated table is never enforced. An empty table is valid:
//! every event against it becomes a violation.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::record::{ParseRecordError, TransitionRecord};
use crate::store::{TransitionStore, TransitionTable, DEFAULT_CAPACITY};

/// A line the loader could not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line: usize,
    /// Raw text.
    pub content: String,
    /// Parse failure.
    pub error: ParseRecordError,
}

/// Summary of one load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records installed, counting overwrites.
    pub installed: usize,
    /// Malformed lines.
    pub skipped: Vec<SkippedLine>,
}

/// Populates the transition store from a table file.
#[derive(Debug, Clone, Copy)]
pub struct TableLoader {
    capacity: usize,
}

impl TableLoader {
    /// Loader with the default store capacity.
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Sets the store capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Loads the table at `path`.
    ///
    /// # Errors
    ///
    /// - [`MonitorError::TableIo`] if the file cannot be opened or read
    /// - [`MonitorError::Populate`] if the store rejects a record
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(TransitionTable, LoadReport)> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MonitorError::TableIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loading transition table {}", path.display());

        self.load_from_reader(BufReader::new(file))
            .map_err(|e| match e {
                MonitorError::TableRead(source) => MonitorError::TableIo {
                    path: path.to_path_buf(),
                    source,
                },
                other => other,
            })
    }

    /// Loads a table from any buffered reader.
    ///
    /// Read failures surface as [`MonitorError::TableRead`]; [`load`](Self::load)
    /// rewrites them to [`MonitorError::TableIo`] with the path attached.
    pub fn load_from_reader<R: BufRead>(&self, mut reader: R) -> Result<(TransitionTable, LoadReport)> {
        let mut store = TransitionStore::with_capacity(self.capacity);
        let mut report = LoadReport::default();
        let mut buf = Vec::new();
        let mut number = 0;

        loop {
            buf.clear();
            if reader
                .read_until(b'\n', &mut buf)
                .map_err(MonitorError::TableRead)?
                == 0
            {
                break;
            }
            number += 1;
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            if TransitionRecord::is_comment(&line) {
                continue;
            }

            let record = match line.parse::<TransitionRecord>() {
                Ok(record) => record,
                Err(error) => {
                    warn!("skipping table line {}: {} ({:?})", number, error, line);
                    report.skipped.push(SkippedLine {
                        line: number,
                        content: line,
                        error,
                    });
                    continue;
                }
            };

            store
                .insert(record)
                .map_err(|source| MonitorError::Populate {
                    line: number,
                    source,
                })?;
            report.installed += 1;
        }

        if store.is_empty() {
            warn!("transition table is empty; every event will be a violation");
        }
        info!(
            "loaded {} transitions ({} installed, {} skipped)",
            store.len(),
            report.installed,
            report.skipped.len()
        );
        Ok((store.freeze(), report))
    }
}

impl Default for TableLoader {
    fn default() -> Self {
        Self::new()
    }
}
