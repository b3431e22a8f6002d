//! Caller-facing errors. These signal misuse of the API; whenever one is
//! returned the workbook state is unchanged.

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum WorkbookError {
    UnknownSheet(String),
    InvalidLocation(String),
    InvalidSheetName(String),
    DuplicateSheetName(String),
    IndexOutOfRange(usize),
    /// A move/copy target rectangle would leave the addressable grid.
    TargetOutOfBounds,
    InvalidSortSpec(String),
    /// Malformed serialized workbook data.
    Json(serde_json::Error),
}

impl fmt::Display for WorkbookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkbookError::UnknownSheet(name) => write!(f, "sheet '{name}' is not found"),
            WorkbookError::InvalidLocation(loc) => write!(f, "invalid cell location '{loc}'"),
            WorkbookError::InvalidSheetName(msg) => write!(f, "invalid sheet name: {msg}"),
            WorkbookError::DuplicateSheetName(name) => {
                write!(f, "sheet name '{name}' already exists")
            }
            WorkbookError::IndexOutOfRange(idx) => write!(f, "index {idx} is out of range"),
            WorkbookError::TargetOutOfBounds => {
                write!(f, "target area extends outside the valid grid")
            }
            WorkbookError::InvalidSortSpec(msg) => write!(f, "invalid sort columns: {msg}"),
            WorkbookError::Json(err) => write!(f, "malformed workbook data: {err}"),
        }
    }
}

impl Error for WorkbookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkbookError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WorkbookError {
    fn from(err: serde_json::Error) -> Self {
        WorkbookError::Json(err)
    }
}
