//! Prompt rendering for the generator, critic and reporter models.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{Framework, Verdict};

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const REPORTER_TEMPLATE: &str = include_str!("prompts/reporter.md");

/// Inputs for a synthesis prompt. Excerpts are already truncated.
#[derive(Debug, Clone)]
pub struct GeneratorPrompt<'a> {
    pub functions: &'a [String],
    pub framework: Framework,
    pub spec_excerpt: &'a str,
    pub source_excerpt: Option<&'a str>,
    pub feedback: Option<&'a str>,
    pub previous_code: Option<&'a str>,
}

/// One failing test as shown to the critic.
#[derive(Debug, Clone, Serialize)]
pub struct FailureExcerpt {
    pub nodeid: String,
    pub outcome: String,
    pub longrepr: String,
}

#[derive(Debug, Clone)]
pub struct CriticPrompt<'a> {
    pub iteration: u32,
    pub max_iterations: u32,
    pub framework: Framework,
    pub functions: &'a [String],
    pub expected_tests: usize,
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub exit_code: i32,
    pub report_available: bool,
    pub failures: &'a [FailureExcerpt],
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub test_code: &'a str,
}

#[derive(Debug, Clone)]
pub struct ReporterPrompt<'a> {
    pub verdict: Verdict,
    pub iterations: u32,
    pub max_iterations: u32,
    pub framework: Framework,
    pub functions: &'a [String],
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub feedback: &'a str,
    pub stderr: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("generator", GENERATOR_TEMPLATE)
            .expect("generator template should be valid");
        env.add_template("critic", CRITIC_TEMPLATE)
            .expect("critic template should be valid");
        env.add_template("reporter", REPORTER_TEMPLATE)
            .expect("reporter template should be valid");
        Self { env }
    }

    pub fn render_generator(&self, input: &GeneratorPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("generator")?;
        let rendered = template.render(context! {
            functions => input.functions,
            expected_tests => input.functions.len(),
            framework => input.framework.as_str(),
            framework_notes => framework_notes(input.framework),
            spec_excerpt => input.spec_excerpt.trim(),
            source_excerpt => non_blank(input.source_excerpt),
            feedback => non_blank(input.feedback),
            previous_code => non_blank(input.previous_code),
        })?;
        Ok(rendered)
    }

    pub fn render_critic(&self, input: &CriticPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("critic")?;
        let rendered = template.render(context! {
            iteration => input.iteration,
            max_iterations => input.max_iterations,
            framework => input.framework.as_str(),
            functions => input.functions,
            expected_tests => input.expected_tests,
            collected => input.collected,
            passed => input.passed,
            failed => input.failed,
            errors => input.errors,
            exit_code => input.exit_code,
            report_available => input.report_available,
            failures => input.failures,
            stdout => input.stdout.trim(),
            stderr => input.stderr.trim(),
            test_code => input.test_code.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_reporter(&self, input: &ReporterPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("reporter")?;
        let rendered = template.render(context! {
            verdict => input.verdict.as_str(),
            iterations => input.iterations,
            max_iterations => input.max_iterations,
            framework => input.framework.as_str(),
            functions => input.functions,
            collected => input.collected,
            passed => input.passed,
            failed => input.failed,
            errors => input.errors,
            feedback => input.feedback.trim(),
            stderr => input.stderr.trim(),
        })?;
        Ok(rendered)
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|s| !s.is_empty())
}

/// Framework-specific instructions appended to the generator contract.
fn framework_notes(framework: Framework) -> Option<&'static str> {
    match framework {
        Framework::Generic => None,
        Framework::Flask => Some(
            "A module-level `app = Flask(__name__)` and a `client` fixture (Flask test client with \
             TESTING enabled) are provided. Take `client` as a parameter, call routes with \
             `client.get`/`client.post`, and assert on `status_code` and `get_json()` or `data`. \
             Do not create another app or redefine the fixture.",
        ),
        Framework::Fastapi => Some(
            "A module-level `app = FastAPI()` and a `client` fixture wrapping \
             `fastapi.testclient.TestClient(app)` are provided. Take `client` as a parameter, call \
             routes with `client.get`/`client.post`, and assert on `status_code` and `json()`. \
             Do not create another app or redefine the fixture.",
        ),
        Framework::Django => Some(
            "Django settings are configured in-module with an in-memory database and a `client` \
             fixture returning `django.test.Client()`. Prefer calling view functions directly with \
             `django.test.RequestFactory` requests; assert on `status_code` and `content`. \
             Do not call `settings.configure` again.",
        ),
    }
}
