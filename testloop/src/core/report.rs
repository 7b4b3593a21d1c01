//! Tolerant reading of the structured pytest report.
//!
//! The report comes from an external plugin and may be partial, malformed or
//! from an older plugin version. Every field is read independently and falls
//! back to zero/empty instead of failing the whole document.

use serde::Serialize;
use serde_json::Value;

/// Outcome counts from the report's `summary` object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
}

impl ReportSummary {
    /// Counts for an optional report; `None` reads as all zeros.
    pub fn of(report: Option<&TestReport>) -> Self {
        report.map(|r| r.summary).unwrap_or_default()
    }

    /// At least one test ran and every collected test passed.
    pub fn all_passed(&self) -> bool {
        self.collected > 0
            && self.passed == self.collected
            && self.failed == 0
            && self.errors == 0
    }

    fn from_value(value: Option<&Value>) -> Self {
        let Some(summary) = value else {
            return Self::default();
        };
        Self {
            collected: count(summary, &["collected"]),
            passed: count(summary, &["passed"]),
            failed: count(summary, &["failed"]),
            // pytest-json-report names the bucket after the outcome (`error`).
            errors: count(summary, &["errors", "error"]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Error,
    Skipped,
    Other,
}

impl TestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Error => "error",
            TestOutcome::Skipped => "skipped",
            TestOutcome::Other => "other",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "passed" => TestOutcome::Passed,
            "failed" => TestOutcome::Failed,
            "error" => TestOutcome::Error,
            "skipped" => TestOutcome::Skipped,
            _ => TestOutcome::Other,
        }
    }
}

/// One entry of the report's `tests` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestCase {
    pub nodeid: String,
    pub outcome: TestOutcome,
    pub longrepr: String,
}

impl TestCase {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TestOutcome::Failed | TestOutcome::Error)
    }

    fn from_value(value: &Value) -> Self {
        let nodeid = value
            .get("nodeid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let outcome = TestOutcome::parse(
            value
                .get("outcome")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        Self {
            nodeid,
            outcome,
            longrepr: longrepr(value),
        }
    }
}

/// Parsed structured report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestReport {
    pub summary: ReportSummary,
    pub tests: Vec<TestCase>,
}

impl TestReport {
    /// Parse report text. Returns `None` when the text is not a JSON object.
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        value.is_object().then(|| Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        let tests = value
            .get("tests")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(TestCase::from_value).collect())
            .unwrap_or_default();
        Self {
            summary: ReportSummary::from_value(value.get("summary")),
            tests,
        }
    }

    pub fn failing_tests(&self) -> impl Iterator<Item = &TestCase> {
        self.tests.iter().filter(|t| t.is_failure())
    }
}

fn count(object: &Value, keys: &[&str]) -> u32 {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_u64))
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Failure text for a test: top-level `longrepr`, else the first phase that has one.
fn longrepr(test: &Value) -> String {
    if let Some(text) = test.get("longrepr").and_then(Value::as_str) {
        return text.to_string();
    }
    ["call", "setup", "teardown"]
        .iter()
        .find_map(|phase| test.pointer(&format!("/{phase}/longrepr"))?.as_str())
        .unwrap_or_default()
        .to_string()
}
