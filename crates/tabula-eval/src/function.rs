//! The `Function` trait and its capability flags.

use tabula_common::{CellError, CellValue};

use crate::traits::{ArgumentHandle, FunctionContext};

bitflags::bitflags! {
    /// Declares what a function is and how the engine may treat it.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FnCaps: u8 {
        /// Same inputs, same output, no side effects.
        const PURE          = 0b0000_0001;
        /// Output may change without its inputs changing.
        const VOLATILE      = 0b0000_0010;
        /// Evaluates some arguments lazily (IF, CHOOSE, AND, …); branches
        /// not taken contribute no dependencies.
        const SHORT_CIRCUIT = 0b0000_0100;
        /// Reduces a range of inputs to a single value (SUM, MIN, …).
        const REDUCTION     = 0b0000_1000;
        /// Performs a search over a range (VLOOKUP, HLOOKUP).
        const LOOKUP        = 0b0001_0000;
    }
}

/// A worksheet function. Implementations receive unevaluated argument
/// handles; forcing an argument is what makes it a dependency of the
/// calling cell.
pub trait Function: Send + Sync + 'static {
    fn caps(&self) -> FnCaps {
        FnCaps::PURE
    }

    fn name(&self) -> &'static str;

    fn min_args(&self) -> usize {
        0
    }

    fn variadic(&self) -> bool {
        false
    }

    /// Upper argument bound; `None` when variadic.
    fn max_args(&self) -> Option<usize> {
        if self.variadic() {
            None
        } else {
            Some(self.min_args())
        }
    }

    fn eval(
        &self,
        args: &[ArgumentHandle<'_, '_>],
        ctx: &FunctionContext<'_, '_>,
    ) -> Result<CellValue, CellError>;
}
