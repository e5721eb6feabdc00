//! Transition table record format.
//!
//! One transition per line, four unsigned 32-bit decimal fields separated
//! by whitespace:
//!
//! ```text
//! # current_state input_id next_state is_final
//! 0 5 1 0
//! 1 7 2 1
//! ```
//!
//! Lines starting with `#` and blank lines are comments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of fields in a record line.
pub const RECORD_FIELDS: usize = 4;

/// Comment marker for hand-authored tables.
pub const COMMENT_PREFIX: char = '#';

/// One deterministic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State the process must be in.
    pub current_state: u32,
    /// Correlation id that fires the transition.
    pub input_id: u32,
    /// State after the transition.
    pub next_state: u32,
    /// The transition reaches an accepting state.
    pub is_final: bool,
}

impl TransitionRecord {
    /// Creates a record.
    pub const fn new(current_state: u32, input_id: u32, next_state: u32, is_final: bool) -> Self {
        Self {
            current_state,
            input_id,
            next_state,
            is_final,
        }
    }

    /// Returns true for lines the loader ignores outright.
    pub fn is_comment(line: &str) -> bool {
        let line = line.trim();
        line.is_empty() || line.starts_with(COMMENT_PREFIX)
    }
}

impl fmt::Display for TransitionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.current_state,
            self.input_id,
            self.next_state,
            u8::from(self.is_final)
        )
    }
}

/// Why a line is not a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseRecordError {
    /// Wrong number of whitespace-separated fields.
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),

    /// A field is not an unsigned 32-bit integer.
    #[error("field `{field}` is not an unsigned 32-bit integer: {value:?}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Offending text.
        value: String,
    },
}

impl FromStr for TransitionRecord {
    type Err = ParseRecordError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        const NAMES: [&str; RECORD_FIELDS] = ["current_state", "input_id", "next_state", "is_final"];

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != RECORD_FIELDS {
            return Err(ParseRecordError::FieldCount(fields.len()));
        }

        let mut values = [0u32; RECORD_FIELDS];
        for ((slot, text), field) in values.iter_mut().zip(&fields).zip(NAMES) {
            *slot = text.parse().map_err(|_| ParseRecordError::InvalidField {
                field,
                value: text.to_string(),
            })?;
        }

        let [current_state, input_id, next_state, is_final] = values;
        Ok(Self::new(current_state, input_id, next_state, is_final != 0))
    }
}
