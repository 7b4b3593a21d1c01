//! Critic: classify an execution attempt and write feedback for the next one.
//!
//! Two outcomes are decided without the model: a clean run of every expected
//! test is `success`, and a timed-out run is `needs_fix`. Everything else goes
//! to the critic model; its reply passes through [`parse_critic_reply`] and
//! any failure along the way degrades to `needs_fix`.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::payload::excerpt;
use crate::core::report::ReportSummary;
use crate::core::types::{Framework, Verdict};
use crate::core::verdict::{CriticReply, is_fast_success, parse_critic_reply};
use crate::io::config::ModelSettings;
use crate::io::llm::{GenerationRequest, TextGenerator};
use crate::io::prompt::{CriticPrompt, FailureExcerpt, PromptEngine};
use crate::io::runner::ExecutionResult;

const MAX_FAILURES: usize = 3;
const LONGREPR_CHARS: usize = 400;
const TEST_CODE_CHARS: usize = 1_500;
const STDOUT_CHARS: usize = 2_000;
const STDERR_CHARS: usize = 1_000;

pub const UNPARSABLE_FEEDBACK: &str = "Could not parse critic response. Regenerate the test \
     module so that every listed function has one passing test.";

pub const TIMEOUT_FEEDBACK: &str = "The test run timed out and was killed before pytest could \
     report results. Remove infinite loops, blocking calls (input(), sleeps, network access) and \
     servers started at import time.";

#[derive(Debug, Clone, Copy)]
pub struct CritiqueInputs<'a> {
    pub iteration: u32,
    pub max_iterations: u32,
    pub framework: Framework,
    pub functions: &'a [String],
    pub execution: &'a ExecutionResult,
    pub test_code: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Critique {
    pub verdict: Verdict,
    pub feedback: String,
    pub consulted_model: bool,
}

impl Critique {
    fn without_model(verdict: Verdict, feedback: impl Into<String>) -> Self {
        Self {
            verdict,
            feedback: feedback.into(),
            consulted_model: false,
        }
    }

    fn from_model(verdict: Verdict, feedback: impl Into<String>) -> Self {
        Self {
            verdict,
            feedback: feedback.into(),
            consulted_model: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Critic {
    model: ModelSettings,
}

impl Critic {
    pub fn new(model: ModelSettings) -> Self {
        Self { model }
    }

    /// Classify one execution attempt. Never fails.
    #[instrument(skip_all, fields(iteration = inputs.iteration))]
    pub fn critique<G: TextGenerator>(&self, generator: &G, inputs: &CritiqueInputs<'_>) -> Critique {
        let summary = ReportSummary::of(inputs.execution.report.as_ref());

        if is_fast_success(&summary, inputs.functions.len()) {
            info!(collected = summary.collected, "all expected tests passed");
            return Critique::without_model(
                Verdict::Success,
                format!("All {} tests passed.", summary.collected),
            );
        }
        if inputs.execution.timed_out {
            info!("classifying timed-out run without the model");
            return Critique::without_model(Verdict::NeedsFix, TIMEOUT_FEEDBACK);
        }

        let reply = match self.ask(generator, inputs, &summary) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "critic model unavailable");
                return Critique::without_model(
                    Verdict::NeedsFix,
                    format!(
                        "Critic model unavailable ({err:#}). {} of {} collected tests passed \
                         ({} failed, {} errors); fix the failing tests.",
                        summary.passed, summary.collected, summary.failed, summary.errors
                    ),
                );
            }
        };

        match parse_critic_reply(&reply) {
            CriticReply::Parsed {
                verdict: Verdict::Success,
                feedback,
            } if !summary.all_passed() => {
                warn!(?summary, "critic claimed success the report does not support");
                Critique::from_model(
                    Verdict::Incomplete,
                    format!(
                        "{feedback}\nThe report shows {} of {} collected tests passing with {} \
                         failures and {} errors; every test must run and pass.",
                        summary.passed, summary.collected, summary.failed, summary.errors
                    ),
                )
            }
            CriticReply::Parsed { verdict, feedback } => {
                info!(%verdict, "critic verdict");
                Critique::from_model(verdict, feedback)
            }
            CriticReply::Unparsable(raw) => {
                warn!(reply_chars = raw.len(), "critic reply unparsable");
                Critique::from_model(Verdict::NeedsFix, UNPARSABLE_FEEDBACK)
            }
        }
    }

    fn ask<G: TextGenerator>(
        &self,
        generator: &G,
        inputs: &CritiqueInputs<'_>,
        summary: &ReportSummary,
    ) -> Result<String> {
        let execution = inputs.execution;
        let failures = failure_excerpts(execution);
        let stdout = excerpt(&execution.stdout, STDOUT_CHARS);
        let stderr = excerpt(&execution.stderr, STDERR_CHARS);
        let test_code = excerpt(inputs.test_code, TEST_CODE_CHARS);

        let prompt = PromptEngine::new()
            .render_critic(&CriticPrompt {
                iteration: inputs.iteration,
                max_iterations: inputs.max_iterations,
                framework: inputs.framework,
                functions: inputs.functions,
                expected_tests: inputs.functions.len(),
                collected: summary.collected,
                passed: summary.passed,
                failed: summary.failed,
                errors: summary.errors,
                exit_code: execution.exit_code,
                report_available: execution.report.is_some(),
                failures: &failures,
                stdout: &stdout,
                stderr: &stderr,
                test_code: &test_code,
            })
            .context("render critic prompt")?;

        generator
            .generate(&GenerationRequest::new(&self.model, &prompt))
            .context("critic model call")
    }
}

fn failure_excerpts(execution: &ExecutionResult) -> Vec<FailureExcerpt> {
    let Some(report) = &execution.report else {
        return Vec::new();
    };
    report
        .failing_tests()
        .take(MAX_FAILURES)
        .map(|test| FailureExcerpt {
            nodeid: test.nodeid.clone(),
            outcome: test.outcome.as_str().to_string(),
            longrepr: excerpt(&test.longrepr, LONGREPR_CHARS),
        })
        .collect()
}
