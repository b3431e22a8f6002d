//! Text functions: EXACT.

use tabula_common::{CellError, CellValue};

use crate::function::Function;
use crate::traits::{ArgumentHandle, FunctionContext};

#[derive(Debug)]
pub struct ExactFn; // EXACT(text1, text2) — case-sensitive, unlike `=`

impl Function for ExactFn {
    fn name(&self) -> &'static str {
        "EXACT"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let a = match args[0].value().to_text() {
            Ok(t) => t,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        let b = match args[1].value().to_text() {
            Ok(t) => t,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        Ok(CellValue::Boolean(a == b))
    }
}

pub fn register_builtins() {
    use std::sync::Arc;
    crate::function_registry::register_function(Arc::new(ExactFn));
}

#[cfg(test)]
mod tests {
    use crate::test_workbook::TestWorkbook;
    use tabula_common::CellValue;

    fn eval(formula: &str) -> CellValue {
        TestWorkbook::new().eval(formula)
    }

    #[test]
    fn exact_is_case_sensitive() {
        assert_eq!(eval("=EXACT(\"a\", \"a\")"), CellValue::Boolean(true));
        assert_eq!(eval("=EXACT(\"a\", \"A\")"), CellValue::Boolean(false));
        // `=` comparison is case-insensitive by contrast.
        assert_eq!(eval("=\"a\"=\"A\""), CellValue::Boolean(true));
    }

    #[test]
    fn exact_coerces_to_text() {
        assert_eq!(eval("=EXACT(1.50, \"1.5\")"), CellValue::Boolean(true));
        assert_eq!(eval("=EXACT(TRUE, \"TRUE\")"), CellValue::Boolean(true));
    }
}
