//! Stable exit codes for harvester CLI commands.

/// Command succeeded. For `harvester run` this includes cycles that failed
/// but still recorded their outcome.
pub const OK: i32 = 0;
/// The environment or config was unusable, or the command itself failed.
pub const INVALID: i32 = 1;
