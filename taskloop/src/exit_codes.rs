//! Stable exit codes for taskloop CLI commands.

/// Loop stopped successfully, or a command completed.
pub const OK: i32 = 0;
/// Loop stopped with failure, hit max iterations, or could not persist state.
pub const FAILURE: i32 = 1;
/// Invalid arguments, configuration, template or backlog. Nothing was run.
pub const INVALID: i32 = 2;
/// `taskloop select` found no pending item.
pub const NONE_PENDING: i32 = 3;
