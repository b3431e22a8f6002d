//! Builtin worksheet functions, grouped by domain.

pub mod info;
pub mod logical;
pub mod lookup;
pub mod math;
pub mod text;

use std::sync::Once;

static INIT: Once = Once::new();

/// Register every builtin exactly once per process.
pub fn ensure_registered() {
    INIT.call_once(|| {
        logical::register_builtins();
        info::register_builtins();
        math::register_builtins();
        lookup::register_builtins();
        text::register_builtins();
    });
}
