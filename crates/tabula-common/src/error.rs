//! Spreadsheet error values.
//!
//! - **`CellErrorKind`** : the fixed, prioritised set of error codes
//! - **`CellError`**     : a kind plus an optional human explanation
//!
//! Error values are ordinary cell values, never Rust errors. `Display`
//! renders the canonical code (`#DIV/0!`, …); parsing accepts any case.

use std::{error::Error, fmt};

/// All recognised error codes, in propagation priority order.
///
/// A lower discriminant wins when an operation sees errors on both sides.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CellErrorKind {
    /// A formula did not parse (`#ERROR!`).
    Parse = 1,
    /// The cell participates in a circular reference (`#CIRCREF!`).
    Circ = 2,
    /// A cell reference is invalid or out of bounds (`#REF!`).
    Ref = 3,
    /// Unrecognised function name (`#NAME?`).
    Name = 4,
    /// A value of the wrong type was encountered (`#VALUE!`).
    Value = 5,
    /// Division by zero (`#DIV/0!`).
    Div = 6,
}

impl fmt::Display for CellErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "#ERROR!",
            Self::Circ => "#CIRCREF!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Value => "#VALUE!",
            Self::Div => "#DIV/0!",
        })
    }
}

impl CellErrorKind {
    /// Parse a canonical error code, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "#ERROR!" => Some(Self::Parse),
            "#CIRCREF!" => Some(Self::Circ),
            "#REF!" => Some(Self::Ref),
            "#NAME?" => Some(Self::Name),
            "#VALUE!" => Some(Self::Value),
            "#DIV/0!" => Some(Self::Div),
            _ => None,
        }
    }

    /// Propagation priority; lower wins.
    #[inline]
    pub fn priority(self) -> u8 {
        self as u8
    }
}

/// An error value as stored in a cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellError {
    pub kind: CellErrorKind,
    pub message: Option<String>,
}

impl CellError {
    pub fn new(kind: CellErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Of two errors, keep the one with the higher propagation priority.
    pub fn worst(self, other: CellError) -> CellError {
        if other.kind.priority() < self.kind.priority() {
            other
        } else {
            self
        }
    }
}

impl From<CellErrorKind> for CellError {
    fn from(kind: CellErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl Error for CellError {}

impl PartialEq<str> for CellError {
    fn eq(&self, other: &str) -> bool {
        self.kind.to_string() == other
    }
}

impl PartialEq<&str> for CellError {
    fn eq(&self, other: &&str) -> bool {
        self.kind.to_string() == *other
    }
}
