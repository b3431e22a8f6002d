//! Object-safe seams between the interpreter, the cell store and the
//! builtin functions.

use std::sync::Arc;

use tabula_common::{CellError, CellErrorKind, CellValue, Coord};
use tabula_parse::parser::{ASTNode, CellRef, ReferenceType};

use crate::function::Function;
use crate::interpreter::Interpreter;

/// A cell observed while evaluating a formula. The sheet component is the
/// lowercased name, so references to sheets that do not exist yet are
/// still trackable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepCell {
    pub sheet: String,
    pub coord: Coord,
}

/// Read access the interpreter needs from the surrounding store.
pub trait EvaluationContext {
    /// Current stored value of a cell. Sheet lookup is case-insensitive;
    /// a sheet that does not exist yields the `#REF!` error. Never
    /// triggers nested re-evaluation.
    fn resolve_cell(&self, sheet: &str, coord: Coord) -> CellValue;

    /// Case-insensitive function lookup.
    fn get_function(&self, name: &str) -> Option<Arc<dyn Function>>;
}

/// A rectangular block of already-evaluated values, row-major.
#[derive(Debug, Clone)]
pub struct RangeValues {
    pub rows: Vec<Vec<CellValue>>,
}

impl RangeValues {
    pub fn iter_cells(&self) -> impl Iterator<Item = &CellValue> {
        self.rows.iter().flat_map(|r| r.iter())
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }
}

/// An evaluated argument: either one value or a range block.
pub enum EvaluatedArg {
    Scalar(CellValue),
    Range(RangeValues),
}

/// An unevaluated function argument.
///
/// Holding the AST plus the interpreter makes every argument a thunk:
/// a function that never calls `value()` on an argument neither computes
/// it nor picks up its dependencies.
pub struct ArgumentHandle<'a, 'b> {
    node: &'a ASTNode,
    interp: &'a Interpreter<'b>,
}

impl<'a, 'b> ArgumentHandle<'a, 'b> {
    pub fn new(node: &'a ASTNode, interp: &'a Interpreter<'b>) -> Self {
        Self { node, interp }
    }

    /// Force the argument to a single value.
    pub fn value(&self) -> CellValue {
        self.interp.evaluate(self.node)
    }

    /// Force the argument as a range block. Only range references qualify.
    pub fn range(&self) -> Result<RangeValues, CellError> {
        match self.node {
            ASTNode::Reference(ReferenceType::Range { sheet, start, end }) => {
                self.interp.eval_range(sheet.as_deref(), start, end)
            }
            _ => Err(CellError::new(CellErrorKind::Value)
                .with_message("expected a cell range argument")),
        }
    }

    /// Force the argument as either a scalar or a range block.
    pub fn value_or_range(&self) -> EvaluatedArg {
        if matches!(self.node, ASTNode::Reference(ReferenceType::Range { .. })) {
            match self.range() {
                Ok(range) => EvaluatedArg::Range(range),
                Err(e) => EvaluatedArg::Scalar(CellValue::Error(e)),
            }
        } else {
            EvaluatedArg::Scalar(self.value())
        }
    }

    pub fn ast(&self) -> &'a ASTNode {
        self.node
    }
}

/// Narrow context handed to builtins for late-bound reference work
/// (INDIRECT resolves text to a cell at evaluation time).
pub struct FunctionContext<'a, 'b> {
    interp: &'a Interpreter<'b>,
}

impl<'a, 'b> FunctionContext<'a, 'b> {
    pub(crate) fn new(interp: &'a Interpreter<'b>) -> Self {
        Self { interp }
    }

    /// Dereference a cell, recording it as a dependency of the calling
    /// cell. An unqualified reference resolves against the current sheet.
    pub fn resolve_reference(&self, sheet: Option<&str>, cell: &CellRef) -> CellValue {
        self.interp.resolve_cell_ref(sheet, cell)
    }
}
