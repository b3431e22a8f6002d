//! Inspection and error-handling functions: ISBLANK, ISERROR, IFERROR,
//! VERSION.

use tabula_common::{CellError, CellValue};

use crate::function::{FnCaps, Function};
use crate::traits::{ArgumentHandle, FunctionContext};

#[derive(Debug)]
pub struct IsBlankFn;

/// TRUE only for an empty value; errors test as FALSE rather than
/// propagating, like the rest of the IS* family.
impl Function for IsBlankFn {
    fn name(&self) -> &'static str {
        "ISBLANK"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        Ok(CellValue::Boolean(matches!(
            args[0].value(),
            CellValue::Empty
        )))
    }
}

#[derive(Debug)]
pub struct IsErrorFn;

/// Forces exactly its argument and reports whether it is an error value.
impl Function for IsErrorFn {
    fn name(&self) -> &'static str {
        "ISERROR"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        Ok(CellValue::Boolean(args[0].value().is_error()))
    }
}

#[derive(Debug)]
pub struct IfErrorFn; // IFERROR(value, value_if_error)

impl Function for IfErrorFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::SHORT_CIRCUIT
    }
    fn name(&self) -> &'static str {
        "IFERROR"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        match args[0].value() {
            CellValue::Error(_) => Ok(args[1].value()),
            other => Ok(other),
        }
    }
}

#[derive(Debug)]
pub struct VersionFn;

impl Function for VersionFn {
    fn name(&self) -> &'static str {
        "VERSION"
    }
    fn eval(
        &self,
        _args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        Ok(CellValue::Text(env!("CARGO_PKG_VERSION").to_string()))
    }
}

pub fn register_builtins() {
    use std::sync::Arc;
    crate::function_registry::register_function(Arc::new(IsBlankFn));
    crate::function_registry::register_function(Arc::new(IsErrorFn));
    crate::function_registry::register_function(Arc::new(IfErrorFn));
    crate::function_registry::register_function(Arc::new(VersionFn));
}
