//! Stable exit codes for pipeline CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Configuration or replay file could not be loaded or is invalid.
pub const INVALID: i32 = 1;
