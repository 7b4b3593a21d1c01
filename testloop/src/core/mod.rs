//! Deterministic, pure logic shared by the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and data structures and return deterministic outputs suitable for
//! tests. Parsing companion source (tree-sitter) and critic replies
//! (JSON Schema) happens here because both are pure functions of their input.

pub mod combine;
pub mod extract;
pub mod payload;
pub mod python;
pub mod report;
pub mod routing;
pub mod types;
pub mod verdict;
