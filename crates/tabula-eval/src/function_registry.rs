//! Global, case-insensitive registry of worksheet functions.
//!
//! Built once per process; lookups are lock-free reads.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::function::Function;

static REG: Lazy<DashMap<String, Arc<dyn Function>>> = Lazy::new(DashMap::new);

#[inline]
fn norm<S: AsRef<str>>(s: S) -> String {
    s.as_ref().to_uppercase()
}

pub fn register_function(f: Arc<dyn Function>) {
    REG.insert(norm(f.name()), f);
}

pub fn get(name: &str) -> Option<Arc<dyn Function>> {
    crate::builtins::ensure_registered();
    REG.get(&norm(name)).map(|v| Arc::clone(v.value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FnCaps;
    use crate::traits::{ArgumentHandle, FunctionContext};
    use tabula_common::{CellError, CellValue};

    struct TestFn;

    impl Function for TestFn {
        fn caps(&self) -> FnCaps {
            FnCaps::PURE
        }
        fn name(&self) -> &'static str {
            "__TESTFN__"
        }
        fn eval(
            &self,
            _args: &[ArgumentHandle<'_, '_>],
            _ctx: &FunctionContext<'_, '_>,
        ) -> Result<CellValue, CellError> {
            Ok(CellValue::Boolean(true))
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        register_function(Arc::new(TestFn));
        assert!(get("__testfn__").is_some());
        assert!(get("__TeStFn__").is_some());
        assert!(get("__MISSING__").is_none());
    }

    #[test]
    fn builtins_are_available() {
        for name in [
            "and", "or", "not", "xor", "exact", "if", "iferror", "choose", "isblank", "iserror",
            "version", "indirect", "min", "max", "sum", "average", "hlookup", "vlookup",
        ] {
            assert!(get(name).is_some(), "{name} should be registered");
        }
    }
}
