//! Generate pytest suites with a language model and repair them until they pass.
//!
//! A run detects the functions a README describes, asks a model for a test
//! module, executes it with pytest, and lets a critic model classify the
//! result until every test passes or the iteration budget is spent. The
//! crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (name extraction, combining,
//!   report parsing, verdicts, routing). No I/O.
//! - **[`io`]**: Side-effecting operations (config, HTTP model client,
//!   pytest subprocess, artifacts). Traits at the seams enable test doubles.
//! - **[`agents`]**: Model-backed components built from `core` and `io`.
//!
//! [`workflow`] sequences the agents and owns the loop state.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
