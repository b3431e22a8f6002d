pub mod coord;
pub mod error;
pub mod value;

pub use coord::{column_to_letters, letters_to_column, Coord, CoordError, MAX_COL, MAX_ROW};
pub use error::{CellError, CellErrorKind};
pub use value::{normalize_number, parse_number, CellValue};

/// Stable sheet identifier; never reused once allocated.
pub type SheetId = u32;
