//! The cell value union and its implicit conversions.
//!
//! Numbers are exact decimals (`rust_decimal`), normalised so displayed
//! values carry no trailing fractional zeros and no exponent notation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{CellError, CellErrorKind};

/// A computed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(Decimal),
    Text(String),
    Boolean(bool),
    Error(CellError),
}

/// Strip trailing fractional zeros (`1.500` -> `1.5`, `2.000` -> `2`).
pub fn normalize_number(n: Decimal) -> Decimal {
    n.normalize()
}

/// Parse a decimal-number lexeme, accepting plain and scientific notation.
pub fn parse_number(s: &str) -> Option<Decimal> {
    let s = s.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

impl CellValue {
    /// Interpret non-formula contents: number, error literal, boolean,
    /// otherwise text.
    pub fn from_literal(contents: &str) -> CellValue {
        let trimmed = contents.trim();
        if let Some(n) = parse_number(trimmed) {
            return CellValue::Number(normalize_number(n));
        }
        if let Some(kind) = CellErrorKind::parse(trimmed) {
            return CellValue::Error(CellError::new(kind));
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return CellValue::Boolean(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return CellValue::Boolean(false);
        }
        CellValue::Text(trimmed.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn as_error(&self) -> Option<&CellError> {
        match self {
            CellValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Numeric coercion: booleans become 1/0, text is parsed as a decimal,
    /// empty reads as zero.
    pub fn to_number(&self) -> Result<Decimal, CellError> {
        match self {
            CellValue::Empty => Ok(Decimal::ZERO),
            CellValue::Number(n) => Ok(*n),
            CellValue::Boolean(b) => Ok(if *b { Decimal::ONE } else { Decimal::ZERO }),
            CellValue::Text(s) => parse_number(s).ok_or_else(|| {
                CellError::new(CellErrorKind::Value)
                    .with_message(format!("cannot convert '{s}' to a number"))
            }),
            CellValue::Error(e) => Err(e.clone()),
        }
    }

    /// Text coercion: numbers render canonically, booleans as TRUE/FALSE,
    /// empty as the empty string.
    pub fn to_text(&self) -> Result<String, CellError> {
        match self {
            CellValue::Empty => Ok(String::new()),
            CellValue::Number(n) => Ok(normalize_number(*n).to_string()),
            CellValue::Text(s) => Ok(s.clone()),
            CellValue::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            CellValue::Error(e) => Err(e.clone()),
        }
    }

    /// Boolean coercion: the strings TRUE/FALSE (any case) convert, numbers
    /// test against zero, empty reads as FALSE. Other text is a type error.
    pub fn to_boolean(&self) -> Result<bool, CellError> {
        match self {
            CellValue::Empty => Ok(false),
            CellValue::Boolean(b) => Ok(*b),
            CellValue::Number(n) => Ok(!n.is_zero()),
            CellValue::Text(s) => {
                if s.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if s.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(CellError::new(CellErrorKind::Value)
                        .with_message(format!("cannot convert '{s}' to a boolean")))
                }
            }
            CellValue::Error(e) => Err(e.clone()),
        }
    }

    /// Category rank for mixed-type comparison: boolean > text > number.
    fn category_rank(&self) -> u8 {
        match self {
            CellValue::Number(_) => 0,
            CellValue::Text(_) => 1,
            CellValue::Boolean(_) => 2,
            CellValue::Empty | CellValue::Error(_) => u8::MAX,
        }
    }

    /// Ordering used by comparison operators. Errors must be handled by the
    /// caller before this runs; `Empty` takes the other side's default.
    pub fn compare(&self, other: &CellValue) -> Ordering {
        use CellValue::*;
        match (self, other) {
            // Callers propagate errors before comparing.
            (Error(_), _) | (_, Error(_)) => Ordering::Equal,
            (Empty, Empty) => Ordering::Equal,
            (Empty, _) => other.default_of_category().compare(other),
            (_, Empty) => self.compare(&self.default_of_category()),
            (Number(a), Number(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            _ => self.category_rank().cmp(&other.category_rank()),
        }
    }

    /// The empty-cell stand-in for this value's category (0, "", FALSE).
    fn default_of_category(&self) -> CellValue {
        match self {
            CellValue::Number(_) => CellValue::Number(Decimal::ZERO),
            CellValue::Text(_) => CellValue::Text(String::new()),
            CellValue::Boolean(_) => CellValue::Boolean(false),
            _ => CellValue::Empty,
        }
    }

    /// Total order used when sorting rows: empty < errors (by kind) <
    /// numbers < text (case-insensitive) < booleans.
    pub fn sort_ordering(&self, other: &CellValue) -> Ordering {
        use CellValue::*;
        fn rank(v: &CellValue) -> u8 {
            match v {
                Empty => 0,
                Error(_) => 1,
                Number(_) => 2,
                Text(_) => 3,
                Boolean(_) => 4,
            }
        }
        match (self, other) {
            (Error(a), Error(b)) => a.kind.priority().cmp(&b.kind.priority()),
            (Number(a), Number(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (Boolean(a), Boolean(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{}", normalize_number(*n)),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Error(e) => write!(f, "{}", e.kind),
        }
    }
}

impl From<Decimal> for CellValue {
    fn from(n: Decimal) -> Self {
        CellValue::Number(normalize_number(n))
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<CellError> for CellValue {
    fn from(e: CellError) -> Self {
        CellValue::Error(e)
    }
}
