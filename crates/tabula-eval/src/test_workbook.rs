//! In-memory evaluation context for interpreter and builtin tests.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use tabula_common::{CellError, CellErrorKind, CellValue, Coord};
use tabula_parse::parser::{parse_formula, CellRef};

use crate::function::Function;
use crate::interpreter::Interpreter;
use crate::traits::{DepCell, EvaluationContext};

/// A tiny sheet store backing an `Interpreter` directly.
pub struct TestWorkbook {
    sheets: FxHashSet<String>,
    cells: FxHashMap<(String, Coord), CellValue>,
    current: String,
}

impl Default for TestWorkbook {
    fn default() -> Self {
        Self::new()
    }
}

impl TestWorkbook {
    pub fn new() -> Self {
        let mut sheets = FxHashSet::default();
        sheets.insert("sheet1".to_string());
        Self {
            sheets,
            cells: FxHashMap::default(),
            current: "Sheet1".to_string(),
        }
    }

    pub fn with_sheet(mut self, name: &str) -> Self {
        self.sheets.insert(name.to_lowercase());
        self
    }

    pub fn with_cell(mut self, sheet: &str, location: &str, value: CellValue) -> Self {
        let coord = CellRef::parse(location)
            .and_then(|r| r.coord())
            .expect("test location must be valid");
        self.sheets.insert(sheet.to_lowercase());
        self.cells.insert((sheet.to_lowercase(), coord), value);
        self
    }

    pub fn eval(&self, formula: &str) -> CellValue {
        let ast = parse_formula(formula).expect("test formula must parse");
        Interpreter::new(self, &self.current).evaluate(&ast)
    }

    /// Evaluate and return the observed dependency set.
    pub fn eval_deps(&self, formula: &str) -> FxHashSet<DepCell> {
        let ast = parse_formula(formula).expect("test formula must parse");
        let interp = Interpreter::new(self, &self.current);
        let _ = interp.evaluate(&ast);
        interp.into_deps()
    }
}

impl EvaluationContext for TestWorkbook {
    fn resolve_cell(&self, sheet: &str, coord: Coord) -> CellValue {
        let key = sheet.to_lowercase();
        if !self.sheets.contains(&key) {
            return CellValue::Error(
                CellError::new(CellErrorKind::Ref).with_message(format!("unknown sheet '{sheet}'")),
            );
        }
        self.cells
            .get(&(key, coord))
            .cloned()
            .unwrap_or(CellValue::Empty)
    }

    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>> {
        crate::function_registry::get(name)
    }
}
