//! Top-down formula interpreter.
//!
//! Walks an AST and produces a value while recording every cell it
//! actually reads. Cell-value errors are ordinary values here — the
//! interpreter never fails, it returns error values.

use std::cell::RefCell;
use std::cmp::Ordering;

use rustc_hash::FxHashSet;
use tabula_common::value::normalize_number;
use tabula_common::{CellError, CellErrorKind, CellValue, Coord};
use tabula_parse::parser::{ASTNode, CellRef, ReferenceType};

use crate::traits::{ArgumentHandle, DepCell, EvaluationContext, FunctionContext, RangeValues};

pub struct Interpreter<'a> {
    ctx: &'a dyn EvaluationContext,
    current_sheet: &'a str,
    // Cells read so far during this evaluation. Interior mutability keeps
    // the walker's &self API while argument thunks force lazily.
    deps: RefCell<FxHashSet<DepCell>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a dyn EvaluationContext, current_sheet: &'a str) -> Self {
        Self {
            ctx,
            current_sheet,
            deps: RefCell::new(FxHashSet::default()),
        }
    }

    pub fn current_sheet(&self) -> &'a str {
        self.current_sheet
    }

    /// The dependencies observed since construction.
    pub fn into_deps(self) -> FxHashSet<DepCell> {
        self.deps.into_inner()
    }

    /* ===================  walker  =================== */

    pub fn evaluate(&self, node: &ASTNode) -> CellValue {
        match node {
            ASTNode::Literal(v) => v.clone(),
            ASTNode::Reference(ReferenceType::Cell { sheet, cell }) => {
                self.resolve_cell_ref(sheet.as_deref(), cell)
            }
            ASTNode::Reference(ReferenceType::Range { .. }) => CellValue::Error(
                CellError::new(CellErrorKind::Value)
                    .with_message("cell range is not a single value"),
            ),
            ASTNode::UnaryOp { op, expr } => self.eval_unary(op, expr),
            ASTNode::BinaryOp { op, left, right } => self.eval_binary(op, left, right),
            ASTNode::Function { name, args } => self.eval_function(name, args),
        }
    }

    /* ===================  references  =================== */

    /// Read one cell, recording the dependency. Out-of-grid references are
    /// `#REF!` without a dependency; references into unknown sheets still
    /// record one so later sheet creation re-evaluates the reader.
    pub(crate) fn resolve_cell_ref(&self, sheet: Option<&str>, cell: &CellRef) -> CellValue {
        let Some(coord) = cell.coord() else {
            return CellValue::Error(
                CellError::new(CellErrorKind::Ref).with_message("cell location out of bounds"),
            );
        };
        let sheet_name = sheet.unwrap_or(self.current_sheet);
        self.deps.borrow_mut().insert(DepCell {
            sheet: sheet_name.to_lowercase(),
            coord,
        });
        self.ctx.resolve_cell(sheet_name, coord)
    }

    /// Materialise a range block, recording every covered cell.
    pub(crate) fn eval_range(
        &self,
        sheet: Option<&str>,
        start: &CellRef,
        end: &CellRef,
    ) -> Result<RangeValues, CellError> {
        let (tl, br) = ReferenceType::normalized_corners(start, end).ok_or_else(|| {
            CellError::new(CellErrorKind::Ref).with_message("range corner out of bounds")
        })?;
        let sheet_name = sheet.unwrap_or(self.current_sheet);
        let sheet_lc = sheet_name.to_lowercase();

        let mut rows = Vec::with_capacity((br.row() - tl.row() + 1) as usize);
        for r in tl.row()..=br.row() {
            let mut row = Vec::with_capacity((br.col() - tl.col() + 1) as usize);
            for c in tl.col()..=br.col() {
                let coord = Coord::new(r, c);
                self.deps.borrow_mut().insert(DepCell {
                    sheet: sheet_lc.clone(),
                    coord,
                });
                row.push(self.ctx.resolve_cell(sheet_name, coord));
            }
            rows.push(row);
        }
        Ok(RangeValues { rows })
    }

    /* ===================  operators  =================== */

    fn eval_unary(&self, op: &str, expr: &ASTNode) -> CellValue {
        let v = self.evaluate(expr);
        if v.is_error() {
            return v;
        }
        let n = match v.to_number() {
            Ok(n) => n,
            Err(e) => return CellValue::Error(e),
        };
        let n = if op == "-" { -n } else { n };
        CellValue::Number(normalize_number(n))
    }

    fn eval_binary(&self, op: &str, left: &ASTNode, right: &ASTNode) -> CellValue {
        let l = self.evaluate(left);
        let r = self.evaluate(right);
        if let Some(e) = worst_error(&l, &r) {
            return CellValue::Error(e);
        }

        match op {
            "+" | "-" | "*" | "/" => self.arith(op, &l, &r),
            "&" => {
                let (a, b) = match (l.to_text(), r.to_text()) {
                    (Ok(a), Ok(b)) => (a, b),
                    (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
                };
                CellValue::Text(format!("{a}{b}"))
            }
            "=" | "==" | "<>" | "!=" | "<" | ">" | "<=" | ">=" => {
                let ordering = l.compare(&r);
                let result = match op {
                    "=" | "==" => ordering == Ordering::Equal,
                    "<>" | "!=" => ordering != Ordering::Equal,
                    "<" => ordering == Ordering::Less,
                    ">" => ordering == Ordering::Greater,
                    "<=" => ordering != Ordering::Greater,
                    ">=" => ordering != Ordering::Less,
                    _ => unreachable!(),
                };
                CellValue::Boolean(result)
            }
            other => CellValue::Error(
                CellError::new(CellErrorKind::Value)
                    .with_message(format!("unsupported operator '{other}'")),
            ),
        }
    }

    fn arith(&self, op: &str, l: &CellValue, r: &CellValue) -> CellValue {
        let a = match l.to_number() {
            Ok(n) => n,
            Err(e) => return CellValue::Error(e),
        };
        let b = match r.to_number() {
            Ok(n) => n,
            Err(e) => return CellValue::Error(e),
        };
        let result = match op {
            "+" => a.checked_add(b),
            "-" => a.checked_sub(b),
            "*" => a.checked_mul(b),
            "/" => {
                if b.is_zero() {
                    return CellValue::Error(CellError::new(CellErrorKind::Div));
                }
                a.checked_div(b)
            }
            _ => unreachable!(),
        };
        match result {
            Some(n) => CellValue::Number(normalize_number(n)),
            None => CellValue::Error(
                CellError::new(CellErrorKind::Value).with_message("numeric overflow"),
            ),
        }
    }

    /* ===================  function calls  =================== */

    fn eval_function(&self, name: &str, args: &[ASTNode]) -> CellValue {
        let Some(fun) = self.ctx.get_function(name) else {
            return CellValue::Error(
                CellError::new(CellErrorKind::Name)
                    .with_message(format!("unknown function '{name}'")),
            );
        };

        let n = args.len();
        if n < fun.min_args() || fun.max_args().map_or(false, |max| n > max) {
            return CellValue::Error(
                CellError::new(CellErrorKind::Value)
                    .with_message(format!("wrong number of arguments to {}", fun.name())),
            );
        }

        let handles: Vec<ArgumentHandle<'_, '_>> =
            args.iter().map(|a| ArgumentHandle::new(a, self)).collect();
        let fctx = FunctionContext::new(self);
        match fun.eval(&handles, &fctx) {
            Ok(v) => v,
            Err(e) => CellValue::Error(e),
        }
    }
}

/// Of the errors on either side, the one that wins propagation.
fn worst_error(l: &CellValue, r: &CellValue) -> Option<CellError> {
    match (l.as_error(), r.as_error()) {
        (Some(a), Some(b)) => Some(a.clone().worst(b.clone())),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}
