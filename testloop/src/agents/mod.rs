//! Model-backed components of the loop.
//!
//! Each agent owns its model settings and receives the [`TextGenerator`]
//! per call, so tests can substitute a scripted generator.
//!
//! [`TextGenerator`]: crate::io::llm::TextGenerator

pub mod critic;
pub mod reporter;
pub mod synthesizer;
