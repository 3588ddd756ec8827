// src/engine/common.rs
//
// Common utilities shared across engine modules.

use crate::error::SqueezeError;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Unified Result type for engine internals.
pub type EngineResult<T> = std::result::Result<T, SqueezeError>;

/// Run a codec stage, converting a panic inside native code or a decoder into
/// `InternalPanic` so a single bad input cannot take down a whole batch.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            tracing::error!(stage, %message, "panic caught in codec stage");
            Err(SqueezeError::internal_panic(format!(
                "{stage}: panicked: {message}"
            )))
        }
    }
}
