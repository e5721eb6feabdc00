//! Transition table serialization.
//!
//! Renders a reduced [`Automaton`] as the line format the monitor's
//! loader reads: one `current input next final` row per transition,
//! sorted by `(current, input)`, after a single `#` header line.

use std::fs;
use std::path::Path;

use sandman_analysis::Automaton;
use sandman_monitor::TransitionRecord;
use tracing::info;

use crate::error::SandmanError;
use crate::Result;

/// Header line written at the top of every table.
pub const TABLE_HEADER: &str = "# current_state input_id next_state is_final";

/// One record per transition; `is_final` marks transitions into an
/// accepting state.
pub fn records(automaton: &Automaton) -> Vec<TransitionRecord> {
    let mut records: Vec<TransitionRecord> = automaton
        .transitions()
        .map(|t| TransitionRecord::new(t.from, t.symbol, t.to, automaton.is_accepting(t.to)))
        .collect();
    records.sort_unstable();
    records
}

/// The table as text, newline terminated.
pub fn render_table(automaton: &Automaton) -> String {
    let mut out = String::with_capacity(TABLE_HEADER.len() + 1 + automaton.transition_count() * 16);
    out.push_str(TABLE_HEADER);
    out.push('\n');
    for record in records(automaton) {
        out.push_str(&record.to_string());
        out.push('\n');
    }
    out
}

/// Writes the table to `path`, replacing any existing file.
pub fn write_table(automaton: &Automaton, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, render_table(automaton)).map_err(|source| SandmanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "wrote {} transitions to {}",
        automaton.transition_count(),
        path.display()
    );
    Ok(())
}
