//! Numeric reductions: SUM, MIN, MAX, AVERAGE.
//!
//! All four accept a mix of scalars and ranges. Empty range cells are
//! skipped; direct empty arguments coerce to zero like any scalar.

use rust_decimal::Decimal;
use tabula_common::value::normalize_number;
use tabula_common::{CellError, CellErrorKind, CellValue};

use crate::function::{FnCaps, Function};
use crate::traits::{ArgumentHandle, EvaluatedArg, FunctionContext};

/// Collect every numeric input across scalar and range arguments.
/// Returns the winning error when any input errors or fails coercion.
fn collect_numbers(args: &[ArgumentHandle<'_, '_>]) -> Result<Vec<Decimal>, CellError> {
    let mut numbers = Vec::new();
    let mut worst: Option<CellError> = None;
    let mut note = |e: CellError, worst: &mut Option<CellError>| {
        *worst = Some(match worst.take() {
            Some(w) => w.worst(e),
            None => e,
        });
    };

    for h in args {
        match h.value_or_range() {
            EvaluatedArg::Scalar(v) => match v.to_number() {
                Ok(n) => numbers.push(n),
                Err(e) => note(e, &mut worst),
            },
            EvaluatedArg::Range(range) => {
                for cell in range.iter_cells() {
                    if matches!(cell, CellValue::Empty) {
                        continue;
                    }
                    match cell.to_number() {
                        Ok(n) => numbers.push(n),
                        Err(e) => note(e, &mut worst),
                    }
                }
            }
        }
    }

    match worst {
        Some(e) => Err(e),
        None => Ok(numbers),
    }
}

fn checked_sum(numbers: &[Decimal]) -> Result<Decimal, CellError> {
    let mut total = Decimal::ZERO;
    for n in numbers {
        total = total.checked_add(*n).ok_or_else(|| {
            CellError::new(CellErrorKind::Value).with_message("numeric overflow in sum")
        })?;
    }
    Ok(total)
}

#[derive(Debug)]
pub struct SumFn;

impl Function for SumFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "SUM"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let numbers = match collect_numbers(args) {
            Ok(ns) => ns,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        match checked_sum(&numbers) {
            Ok(total) => Ok(CellValue::Number(normalize_number(total))),
            Err(e) => Ok(CellValue::Error(e)),
        }
    }
}

#[derive(Debug)]
pub struct MinFn;

impl Function for MinFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "MIN"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let numbers = match collect_numbers(args) {
            Ok(ns) => ns,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        let min = numbers.into_iter().min().unwrap_or(Decimal::ZERO);
        Ok(CellValue::Number(normalize_number(min)))
    }
}

#[derive(Debug)]
pub struct MaxFn;

impl Function for MaxFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "MAX"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let numbers = match collect_numbers(args) {
            Ok(ns) => ns,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        let max = numbers.into_iter().max().unwrap_or(Decimal::ZERO);
        Ok(CellValue::Number(normalize_number(max)))
    }
}

#[derive(Debug)]
pub struct AverageFn;

impl Function for AverageFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::REDUCTION
    }
    fn name(&self) -> &'static str {
        "AVERAGE"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let numbers = match collect_numbers(args) {
            Ok(ns) => ns,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        if numbers.is_empty() {
            return Ok(CellValue::Error(
                CellError::new(CellErrorKind::Div).with_message("AVERAGE of no values"),
            ));
        }
        let total = match checked_sum(&numbers) {
            Ok(t) => t,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        let count = Decimal::from(numbers.len() as u64);
        match total.checked_div(count) {
            Some(avg) => Ok(CellValue::Number(normalize_number(avg))),
            None => Ok(CellValue::Error(
                CellError::new(CellErrorKind::Value).with_message("numeric overflow in average"),
            )),
        }
    }
}

pub fn register_builtins() {
    use std::sync::Arc;
    crate::function_registry::register_function(Arc::new(SumFn));
    crate::function_registry::register_function(Arc::new(MinFn));
    crate::function_registry::register_function(Arc::new(MaxFn));
    crate::function_registry::register_function(Arc::new(AverageFn));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use tabula_common::{CellErrorKind, CellValue};

    fn num(s: &str) -> CellValue {
        CellValue::Number(s.parse().unwrap())
    }

    fn sheet() -> TestWorkbook {
        TestWorkbook::new()
            .with_cell("Sheet1", "A1", num("1"))
            .with_cell("Sheet1", "A2", num("2"))
            .with_cell("Sheet1", "B1", num("3"))
            .with_cell("Sheet1", "B2", CellValue::Text("4".into()))
    }

    #[test]
    fn sum_over_scalars_and_ranges() {
        let wb = sheet();
        assert_eq!(wb.eval("=SUM(1, 2, 3)"), num("6"));
        assert_eq!(wb.eval("=SUM(A1:B2)"), num("10"));
        assert_eq!(wb.eval("=SUM(A1:B2, 10)"), num("20"));
    }

    #[test]
    fn empty_range_cells_are_skipped() {
        let wb = sheet();
        // C1:C3 is entirely empty.
        assert_eq!(wb.eval("=SUM(C1:C3)"), num("0"));
        assert_eq!(wb.eval("=MIN(A1:A2, C1:C3)"), num("1"));
    }

    #[test]
    fn min_max_defaults_to_zero() {
        let wb = sheet();
        assert_eq!(wb.eval("=MIN(C1:C3)"), num("0"));
        assert_eq!(wb.eval("=MAX(C1:C3)"), num("0"));
        assert_eq!(wb.eval("=MAX(A1:B2)"), num("4"));
    }

    #[test]
    fn average_over_range() {
        let wb = sheet();
        assert_eq!(wb.eval("=AVERAGE(A1:B2)"), num("2.5"));
        let v = wb.eval("=AVERAGE(C1:C3)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Div);
    }

    #[test]
    fn uncoercible_text_in_range_is_a_type_error() {
        let wb = sheet().with_cell("Sheet1", "B2", CellValue::Text("abc".into()));
        let v = wb.eval("=SUM(A1:B2)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Value);
    }

    #[test]
    fn range_error_propagates_with_priority() {
        let wb = sheet()
            .with_cell(
                "Sheet1",
                "A1",
                CellValue::Error(tabula_common::CellError::new(CellErrorKind::Div)),
            )
            .with_cell(
                "Sheet1",
                "A2",
                CellValue::Error(tabula_common::CellError::new(CellErrorKind::Circ)),
            );
        let v = wb.eval("=SUM(A1:B2)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Circ);
    }
}
