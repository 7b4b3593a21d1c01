//! The one boundary where critic model text becomes a [`Verdict`].

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::debug;

use crate::core::report::ReportSummary;
use crate::core::types::Verdict;

const CRITIC_REPLY_SCHEMA: &str = include_str!("../../schemas/critic_reply.schema.json");

static CRITIC_REPLY_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(CRITIC_REPLY_SCHEMA).expect("critic reply schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("critic reply schema should compile")
});

pub const MISSING_FEEDBACK: &str = "No feedback provided.";

/// Result of reading a critic reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriticReply {
    Parsed { verdict: Verdict, feedback: String },
    Unparsable(String),
}

/// Parse a critic reply of the form `{"status": ..., "feedback"|"message": ...}`.
///
/// The JSON object may be surrounded by prose, code fences or reasoning
/// markup. Anything that is not a schema-valid object is `Unparsable`.
pub fn parse_critic_reply(raw: &str) -> CriticReply {
    let unparsable = || CriticReply::Unparsable(raw.to_string());

    let Some(candidate) = json_object_span(raw) else {
        return unparsable();
    };
    let Ok(value) = serde_json::from_str::<Value>(candidate) else {
        return unparsable();
    };
    if !CRITIC_REPLY_VALIDATOR.is_valid(&value) {
        let problems: Vec<String> = CRITIC_REPLY_VALIDATOR
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        debug!(problems = %problems.join("; "), "critic reply failed schema validation");
        return unparsable();
    }

    let status = value["status"].as_str().unwrap_or_default();
    let feedback = ["feedback", "message"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .unwrap_or(MISSING_FEEDBACK)
        .to_string();

    CriticReply::Parsed {
        verdict: verdict_from_status(status),
        feedback,
    }
}

/// Map a status string to a verdict. Unrecognized strings are `Unknown`.
pub fn verdict_from_status(status: &str) -> Verdict {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" => Verdict::Success,
        "needs_fix" | "test_error" => Verdict::NeedsFix,
        "incomplete" => Verdict::Incomplete,
        "source_error" => Verdict::SourceError,
        "max_iterations" => Verdict::MaxIterations,
        _ => Verdict::Unknown,
    }
}

/// Success without consulting the model: every expected test collected and passed.
pub fn is_fast_success(summary: &ReportSummary, expected_tests: usize) -> bool {
    summary.all_passed() && summary.collected as usize == expected_tests
}

fn json_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}
