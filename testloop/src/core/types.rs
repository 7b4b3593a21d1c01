//! Shared deterministic types for the repair loop.
//!
//! These are the closed vocabularies the controller switches on. Free-form
//! model output is converted into them at exactly one boundary
//! ([`crate::core::verdict`]); nothing downstream inspects raw strings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::report::{ReportSummary, TestReport};

/// Web framework detected in the companion source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    Generic,
    Flask,
    Fastapi,
    Django,
}

impl Framework {
    pub fn as_str(self) -> &'static str {
        match self {
            Framework::Generic => "generic",
            Framework::Flask => "flask",
            Framework::Fastapi => "fastapi",
            Framework::Django => "django",
        }
    }

    pub fn is_web(self) -> bool {
        !matches!(self, Framework::Generic)
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a completed execution attempt.
///
/// `NeedsFix` and `Incomplete` send the loop back to synthesis; every other
/// verdict ends it. `Stalled` and `MaxIterations` are only ever assigned by
/// the controller (or, for `MaxIterations`, declared by the critic model).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    NeedsFix,
    Incomplete,
    Stalled,
    SourceError,
    MaxIterations,
    #[default]
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::NeedsFix => "needs_fix",
            Verdict::Incomplete => "incomplete",
            Verdict::Stalled => "stalled",
            Verdict::SourceError => "source_error",
            Verdict::MaxIterations => "max_iterations",
            Verdict::Unknown => "unknown",
        }
    }

    /// True for verdicts that request another synthesis attempt.
    pub fn is_retry(self) -> bool {
        matches!(self, Verdict::NeedsFix | Verdict::Incomplete)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration index.
    pub iteration: u32,
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
}

impl IterationRecord {
    /// Build a record from an optional report; a missing report counts as zeros.
    pub fn from_report(iteration: u32, report: Option<&TestReport>) -> Self {
        let ReportSummary {
            collected,
            passed,
            failed,
            errors,
        } = ReportSummary::of(report);
        Self {
            iteration,
            collected,
            passed,
            failed,
            errors,
        }
    }
}

/// Component that produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Detector,
    Generator,
    Combiner,
    Executor,
    Critic,
    Reporter,
}

impl Agent {
    pub fn as_str(self) -> &'static str {
        match self {
            Agent::Detector => "detector",
            Agent::Generator => "generator",
            Agent::Combiner => "combiner",
            Agent::Executor => "executor",
            Agent::Critic => "critic",
            Agent::Reporter => "reporter",
        }
    }
}

/// One line of the append-only workflow history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub agent: Agent,
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_needs_fix_and_incomplete_retry() {
        let retry: Vec<Verdict> = [
            Verdict::Success,
            Verdict::NeedsFix,
            Verdict::Incomplete,
            Verdict::Stalled,
            Verdict::SourceError,
            Verdict::MaxIterations,
            Verdict::Unknown,
        ]
        .into_iter()
        .filter(|v| v.is_retry())
        .collect();
        assert_eq!(retry, vec![Verdict::NeedsFix, Verdict::Incomplete]);
    }

    #[test]
    fn verdict_serializes_as_snake_case() {
        let json = serde_json::to_string(&Verdict::MaxIterations).expect("serialize");
        assert_eq!(json, "\"max_iterations\"");
        assert_eq!(Verdict::SourceError.to_string(), "source_error");
    }

    #[test]
    fn record_from_missing_report_is_all_zero() {
        let record = IterationRecord::from_report(2, None);
        assert_eq!(
            record,
            IterationRecord {
                iteration: 2,
                collected: 0,
                passed: 0,
                failed: 0,
                errors: 0,
            }
        );
    }
}
