pub mod error;
mod io;
mod ops;
pub mod workbook;

pub use error::WorkbookError;
pub use workbook::{ChangeObserver, Workbook};

pub use tabula_common::{CellError, CellErrorKind, CellValue};
