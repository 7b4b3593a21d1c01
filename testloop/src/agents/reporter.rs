//! Final human-readable summary of a run.

use anyhow::{Context, Result};
use tracing::{instrument, warn};

use crate::core::payload::{excerpt, strip_reasoning};
use crate::core::report::ReportSummary;
use crate::core::types::{Framework, Verdict};
use crate::io::config::ModelSettings;
use crate::io::llm::{GenerationRequest, TextGenerator};
use crate::io::prompt::{PromptEngine, ReporterPrompt};

const STDERR_CHARS: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    pub verdict: Verdict,
    /// Execution attempts made.
    pub iterations: u32,
    pub max_iterations: u32,
    pub framework: Framework,
    pub functions: &'a [String],
    pub summary: ReportSummary,
    pub feedback: &'a str,
    pub stderr: &'a str,
}

#[derive(Debug, Clone)]
pub struct Reporter {
    model: ModelSettings,
}

impl Reporter {
    pub fn new(model: ModelSettings) -> Self {
        Self { model }
    }

    /// Summarize the run. Falls back to [`fallback_summary`] when the model
    /// call fails or returns nothing usable.
    #[instrument(skip_all, fields(verdict = %inputs.verdict))]
    pub fn report<G: TextGenerator>(&self, generator: &G, inputs: &ReportInputs<'_>) -> String {
        match self.ask(generator, inputs) {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                warn!("reporter returned an empty summary");
                fallback_summary(inputs)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "reporter model unavailable");
                fallback_summary(inputs)
            }
        }
    }

    fn ask<G: TextGenerator>(&self, generator: &G, inputs: &ReportInputs<'_>) -> Result<String> {
        let stderr = excerpt(inputs.stderr, STDERR_CHARS);
        let prompt = PromptEngine::new()
            .render_reporter(&ReporterPrompt {
                verdict: inputs.verdict,
                iterations: inputs.iterations,
                max_iterations: inputs.max_iterations,
                framework: inputs.framework,
                functions: inputs.functions,
                collected: inputs.summary.collected,
                passed: inputs.summary.passed,
                failed: inputs.summary.failed,
                errors: inputs.summary.errors,
                feedback: inputs.feedback,
                stderr: &stderr,
            })
            .context("render reporter prompt")?;
        let response = generator
            .generate(&GenerationRequest::new(&self.model, &prompt))
            .context("reporter model call")?;
        Ok(strip_reasoning(&response))
    }
}

/// Deterministic summary used when the reporter model is unavailable.
pub fn fallback_summary(inputs: &ReportInputs<'_>) -> String {
    let headline = match inputs.verdict {
        Verdict::Success => "All generated tests passed.",
        Verdict::MaxIterations => "The iteration budget ran out before all tests passed.",
        Verdict::Stalled => "Stopped early: the number of passing tests stopped improving.",
        Verdict::SourceError => "The functions under test appear to be broken.",
        Verdict::NeedsFix | Verdict::Incomplete | Verdict::Unknown => {
            "The run ended without a passing test suite."
        }
    };
    let s = inputs.summary;
    let mut text = format!(
        "{headline}\nStatus: {} after {} of {} iterations ({} framework).\nLast run: {} collected, {} passed, {} failed, {} errors.",
        inputs.verdict,
        inputs.iterations,
        inputs.max_iterations,
        inputs.framework,
        s.collected,
        s.passed,
        s.failed,
        s.errors
    );
    if inputs.verdict != Verdict::Success && !inputs.feedback.trim().is_empty() {
        text.push_str("\nLast feedback: ");
        text.push_str(inputs.feedback.trim());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    fn inputs<'a>(verdict: Verdict, functions: &'a [String]) -> ReportInputs<'a> {
        ReportInputs {
            verdict,
            iterations: 3,
            max_iterations: 3,
            framework: Framework::Generic,
            functions,
            summary: ReportSummary {
                collected: 2,
                passed: 1,
                failed: 1,
                errors: 0,
            },
            feedback: "test_b expects the wrong value",
            stderr: "",
        }
    }

    #[test]
    fn strips_reasoning_from_model_summary() {
        let generator = ScriptedGenerator::new().reply(
            "reporter",
            "<think>let me see</think>\nTwo tests ran; one still fails.",
        );
        let names = vec!["a".to_string(), "b".to_string()];
        let text = Reporter::new(ModelSettings::new("reporter", 0.3))
            .report(&generator, &inputs(Verdict::MaxIterations, &names));
        assert_eq!(text, "Two tests ran; one still fails.");
    }

    #[test]
    fn falls_back_when_model_fails() {
        let generator = ScriptedGenerator::new().fail("reporter", "rate limited");
        let names = vec!["a".to_string(), "b".to_string()];
        let text = Reporter::new(ModelSettings::new("reporter", 0.3))
            .report(&generator, &inputs(Verdict::MaxIterations, &names));
        assert!(text.starts_with("The iteration budget ran out"));
        assert!(text.contains("Status: max_iterations after 3 of 3 iterations"));
        assert!(text.contains("Last feedback: test_b expects the wrong value"));
    }

    #[test]
    fn fallback_for_success_omits_feedback() {
        let names = vec!["a".to_string()];
        let text = fallback_summary(&inputs(Verdict::Success, &names));
        assert!(text.starts_with("All generated tests passed."));
        assert!(!text.contains("Last feedback"));
    }
}
