//! Stable exit codes for testloop CLI commands.

/// The command succeeded; for `run`, every generated test passed.
pub const OK: i32 = 0;
/// Invalid input, configuration or missing credential.
pub const INVALID: i32 = 1;
/// `testloop run` finished without a passing suite.
pub const NOT_CONVERGED: i32 = 2;
