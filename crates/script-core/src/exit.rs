//! Typed sentinel exit codes for the Script runtime.
//!
//! Kept as plain constants rather than an enum: a Script's `exit_code`
//! eventually resolves to a non-negative integer, and subprocess-native
//! codes occupy the entire `0..=255` range, so there is no closed set to
//! enumerate over.

/// Clean exit.
pub const SUCCESS: i32 = 0;

/// Interrupted by signal (`kill()` accepted and the Script exited as a
/// result).
pub const SIGNALED: i32 = 143;

/// The subprocess failed to start.
pub const SPAWN_FAILED: i32 = 256;

/// An unhandled, non-process exception unwound out of the Script (e.g. a
/// capture callback panicked or returned a non-[`crate::error::ScriptError`]
/// error).
pub const UNHANDLED_EXCEPTION: i32 = 257;

/// Whether `code` falls in the subprocess-native non-zero range.
pub fn is_native_failure(code: i32) -> bool {
    (1..=255).contains(&code)
}
