//! Logical and branching functions: AND, OR, NOT, XOR, IF, CHOOSE.
//!
//! AND/OR short-circuit left to right; IF and CHOOSE force only the
//! branch they select, so untaken branches never become dependencies.

use rust_decimal::prelude::ToPrimitive;
use tabula_common::{CellError, CellErrorKind, CellValue};

use crate::function::{FnCaps, Function};
use crate::traits::{ArgumentHandle, FunctionContext};

#[derive(Debug)]
pub struct AndFn;

impl Function for AndFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::SHORT_CIRCUIT
    }
    fn name(&self) -> &'static str {
        "AND"
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
        for h in args {
            match h.value().to_boolean() {
                Ok(true) => {}
                Ok(false) => return Ok(CellValue::Boolean(false)),
                Err(e) => return Ok(CellValue::Error(e)),
            }
        }
        Ok(CellValue::Boolean(true))
    }
}

#[derive(Debug)]
pub struct OrFn;

impl Function for OrFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::SHORT_CIRCUIT
    }
    fn name(&self) -> &'static str {
        "OR"
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
        for h in args {
            match h.value().to_boolean() {
                Ok(true) => return Ok(CellValue::Boolean(true)),
                Ok(false) => {}
                Err(e) => return Ok(CellValue::Error(e)),
            }
        }
        Ok(CellValue::Boolean(false))
    }
}

#[derive(Debug)]
pub struct NotFn;

impl Function for NotFn {
    fn name(&self) -> &'static str {
        "NOT"
    }
    fn min_args(&self) -> usize {
        1
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        match args[0].value().to_boolean() {
            Ok(b) => Ok(CellValue::Boolean(!b)),
            Err(e) => Ok(CellValue::Error(e)),
        }
    }
}

#[derive(Debug)]
pub struct XorFn;

impl Function for XorFn {
    fn name(&self) -> &'static str {
        "XOR"
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
        let mut true_count = 0usize;
        let mut worst: Option<CellError> = None;
        for h in args {
            match h.value().to_boolean() {
                Ok(true) => true_count += 1,
                Ok(false) => {}
                Err(e) => {
                    worst = Some(match worst.take() {
                        Some(w) => w.worst(e),
                        None => e,
                    });
                }
            }
        }
        if let Some(e) = worst {
            return Ok(CellValue::Error(e));
        }
        Ok(CellValue::Boolean(true_count % 2 == 1))
    }
}

#[derive(Debug)]
pub struct IfFn; // IF(condition, value_if_true, [value_if_false])

impl Function for IfFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::SHORT_CIRCUIT
    }
    fn name(&self) -> &'static str {
        "IF"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn max_args(&self) -> Option<usize> {
        Some(3)
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let cond = match args[0].value().to_boolean() {
            Ok(b) => b,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        if cond {
            Ok(args[1].value())
        } else if let Some(otherwise) = args.get(2) {
            Ok(otherwise.value())
        } else {
            Ok(CellValue::Boolean(false))
        }
    }
}

#[derive(Debug)]
pub struct ChooseFn; // CHOOSE(index, value1, value2, ...)

impl Function for ChooseFn {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE | FnCaps::SHORT_CIRCUIT
    }
    fn name(&self) -> &'static str {
        "CHOOSE"
    }
    fn min_args(&self) -> usize {
        2
    }
    fn variadic(&self) -> bool {
        true
    }
    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        _ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError> {
        let index = match args[0].value().to_number() {
            Ok(n) => n,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        let index = index.trunc().to_i64().unwrap_or(0);
        let choices = &args[1..];
        if index < 1 || index as usize > choices.len() {
            return Ok(CellValue::Error(
                CellError::new(CellErrorKind::Value)
                    .with_message(format!("CHOOSE index {index} out of range")),
            ));
        }
        Ok(choices[(index - 1) as usize].value())
    }
}

pub fn register_builtins() {
    use std::sync::Arc;
    crate::function_registry::register_function(Arc::new(AndFn));
    crate::function_registry::register_function(Arc::new(OrFn));
    crate::function_registry::register_function(Arc::new(NotFn));
    crate::function_registry::register_function(Arc::new(XorFn));
    crate::function_registry::register_function(Arc::new(IfFn));
    crate::function_registry::register_function(Arc::new(ChooseFn));
}
