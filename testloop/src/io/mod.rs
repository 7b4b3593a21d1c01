//! Side-effecting adapters: filesystem, subprocesses and HTTP.

pub mod config;
pub mod iteration_log;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod runner;
