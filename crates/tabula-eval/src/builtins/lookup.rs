//! Range search and late-bound references: VLOOKUP, HLOOKUP, INDIRECT.

use std::cmp::Ordering;

use rust_decimal::prelude::ToPrimitive;
use tabula_common::{CellError, CellErrorKind, CellValue};
use tabula_parse::parser::parse_cell_reference;

use crate::function::{FnCaps, Function};
use crate::traits::{ArgumentHandle, FunctionContext, RangeValues};

/// Exact-match equality used while scanning the key row/column. Error
/// cells never match; they are skipped rather than propagated.
fn lookup_matches(key: &CellValue, candidate: &CellValue) -> bool {
    if candidate.is_error() || key.is_error() {
        return false;
    }
    key.compare(candidate) == Ordering::Equal
}

fn lookup_inputs(
    args: &[ArgumentHandle<'_, '_>],
) -> Result<(CellValue, RangeValues, usize), CellValue> {
    let key = args[0].value();
    if key.is_error() {
        return Err(key);
    }
    let range = match args[1].range() {
        Ok(r) => r,
        Err(e) => return Err(CellValue::Error(e)),
    };
    let index = match args[2].value().to_number() {
        Ok(n) => n.trunc().to_i64().unwrap_or(0),
        Err(e) => return Err(CellValue::Error(e)),
    };
    if index < 1 {
        return Err(CellValue::Error(
            CellError::new(CellErrorKind::Value)
                .with_message(format!("lookup index {index} out of range")),
        ));
    }
    Ok((key, range, index as usize))
}

#[derive(Debug)]
pub struct VLookupFn; // VLOOKUP(key, range, column_index)

impl Function for VLookupFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::LOOKUP
    }
    fn name(&self) -> &'static str {
        "VLOOKUP"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let (key, range, index) = match lookup_inputs(args) {
            Ok(x) => x,
            Err(v) => return Ok(v),
        };
        if index > range.width() {
            return Ok(CellValue::Error(
                CellError::new(CellErrorKind::Value)
                    .with_message("VLOOKUP index beyond range width"),
            ));
        }
        for row in &range.rows {
            if lookup_matches(&key, &row[0]) {
                return Ok(row[index - 1].clone());
            }
        }
        Ok(CellValue::Error(
            CellError::new(CellErrorKind::Value).with_message("VLOOKUP key not found"),
        ))
    }
}

#[derive(Debug)]
pub struct HLookupFn; // HLOOKUP(key, range, row_index)

impl Function for HLookupFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::LOOKUP
    }
    fn name(&self) -> &'static str {
        "HLOOKUP"
    }
    fn min_args(&self) -> usize {
        3
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let (key, range, index) = match lookup_inputs(args) {
            Ok(x) => x,
            Err(v) => return Ok(v),
        };
        if index > range.height() {
            return Ok(CellValue::Error(
                CellError::new(CellErrorKind::Value)
                    .with_message("HLOOKUP index beyond range height"),
            ));
        }
        for col in 0..range.width() {
            if lookup_matches(&key, &range.rows[0][col]) {
                return Ok(range.rows[index - 1][col].clone());
            }
        }
        Ok(CellValue::Error(
            CellError::new(CellErrorKind::Value).with_message("HLOOKUP key not found"),
        ))
    }
}

#[derive(Debug)]
pub struct IndirectFn; // INDIRECT(reference_text)

/// Evaluates its argument, parses the result as a cell reference and
/// dereferences it. The resolved cell becomes a dependency of the
/// calling cell even though it is invisible to static inspection.
impl Function for IndirectFn {
    fn name(&self) -> &'static str {
        "INDIRECT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let v = args[0].value();
        if let CellValue::Error(e) = v {
            return Ok(CellValue::Error(e));
        }
        let text = match v.to_text() {
            Ok(t) => t,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        match parse_cell_reference(&text) {
            Some((sheet, cell)) => Ok(ctx.resolve_reference(sheet.as_deref(), &cell)),
            None => Ok(CellValue::Error(
                CellError::new(CellErrorKind::Ref)
                    .with_message(format!("'{text}' is not a cell reference")),
            )),
        }
    }
}

pub fn register_builtins() {
    use std::sync::Arc;
    crate::function_registry::register_function(Arc::new(VLookupFn));
    crate::function_registry::register_function(Arc::new(HLookupFn));
    crate::function_registry::register_function(Arc::new(IndirectFn));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use tabula_common::{CellErrorKind, CellValue};

    fn num(s: &str) -> CellValue {
        CellValue::Number(s.parse().unwrap())
    }

    fn table() -> TestWorkbook {
        TestWorkbook::new()
            .with_cell("Sheet1", "A1", CellValue::Text("apple".into()))
            .with_cell("Sheet1", "B1", num("10"))
            .with_cell("Sheet1", "A2", CellValue::Text("pear".into()))
            .with_cell("Sheet1", "B2", num("20"))
    }

    #[test]
    fn vlookup_exact_match() {
        let wb = table();
        assert_eq!(wb.eval("=VLOOKUP(\"pear\", A1:B2, 2)"), num("20"));
        assert_eq!(wb.eval("=VLOOKUP(\"APPLE\", A1:B2, 2)"), num("10"));
    }

    #[test]
    fn vlookup_miss_is_type_error() {
        let wb = table();
        let v = wb.eval("=VLOOKUP(\"plum\", A1:B2, 2)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Value);
    }

    #[test]
    fn vlookup_index_bounds() {
        let wb = table();
        let v = wb.eval("=VLOOKUP(\"pear\", A1:B2, 3)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Value);
        let v = wb.eval("=VLOOKUP(\"pear\", A1:B2, 0)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Value);
    }

    #[test]
    fn hlookup_searches_first_row() {
        let wb = TestWorkbook::new()
            .with_cell("Sheet1", "A1", CellValue::Text("x".into()))
            .with_cell("Sheet1", "B1", CellValue::Text("y".into()))
            .with_cell("Sheet1", "A2", num("1"))
            .with_cell("Sheet1", "B2", num("2"));
        assert_eq!(wb.eval("=HLOOKUP(\"y\", A1:B2, 2)"), num("2"));
    }

    #[test]
    fn indirect_resolves_text_references() {
        let wb = table();
        assert_eq!(wb.eval("=INDIRECT(\"B2\")"), num("20"));
        assert_eq!(wb.eval("=INDIRECT(\"Sheet1!B1\")"), num("10"));
    }

    #[test]
    fn indirect_bad_text_is_bad_reference() {
        let wb = table();
        let v = wb.eval("=INDIRECT(\"not a ref\")");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Ref);
    }

    #[test]
    fn indirect_records_dynamic_dependency() {
        let wb = table();
        let deps = wb.eval_deps("=INDIRECT(\"B\"&\"2\")");
        assert!(deps.iter().any(|d| d.coord.to_a1() == "B2"));
    }

    #[test]
    fn indirect_propagates_argument_errors() {
        let wb = table();
        let v = wb.eval("=INDIRECT(#DIV/0!)");
        assert_eq!(v.as_error().unwrap().kind, CellErrorKind::Div);
    }
}
