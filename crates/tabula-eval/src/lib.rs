pub mod builtins;
pub mod engine;
pub mod function;
pub mod function_registry;
pub mod interpreter;
pub mod test_workbook;
pub mod traits;

pub use engine::{CellChange, ChangedCell, Engine};
pub use function::{FnCaps, Function};
pub use interpreter::Interpreter;
pub use traits::{
    ArgumentHandle, DepCell, EvaluatedArg, EvaluationContext, FunctionContext, RangeValues,
};
