//! Test-only doubles for the model and test runner seams.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;

use anyhow::{Result, anyhow};
use serde_json::{Value, json};

use crate::io::config::{LlmConfig, LoopConfig, ModelSettings};
use crate::io::llm::{GenerationRequest, TextGenerator};
use crate::io::runner::{ExecutionRequest, RunOutput, TestRunner};

/// A generation request as seen by [`ScriptedGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub temperature: f32,
    pub prompt: String,
}

/// Model double with one reply queue per model name.
///
/// Calls for a model with an exhausted queue fail, which the workflow treats
/// like any other model outage.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: RefCell<HashMap<String, VecDeque<Result<String, String>>>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for `model`.
    pub fn reply(self, model: &str, text: impl Into<String>) -> Self {
        self.push(model, Ok(text.into()));
        self
    }

    /// Queue a failed call for `model`.
    pub fn fail(self, model: &str, message: impl Into<String>) -> Self {
        self.push(model, Err(message.into()));
        self
    }

    fn push(&self, model: &str, reply: Result<String, String>) {
        self.replies
            .borrow_mut()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn calls_for(&self, model: &str) -> Vec<RecordedCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.model == model)
            .cloned()
            .collect()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        self.calls.borrow_mut().push(RecordedCall {
            model: request.model.to_string(),
            temperature: request.temperature,
            prompt: request.prompt.to_string(),
        });
        let next = self
            .replies
            .borrow_mut()
            .get_mut(request.model)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted reply for model {}", request.model)),
        }
    }
}

/// One scripted pytest invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRun {
    /// Written to the report path when present.
    pub report: Option<Value>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ScriptedRun {
    /// A finished run whose report has the given counts.
    pub fn counts(collected: u32, passed: u32, failed: u32, errors: u32) -> Self {
        let exit_code = if passed == collected && failed == 0 && errors == 0 {
            0
        } else {
            1
        };
        Self {
            report: Some(report_json(collected, passed, failed, errors)),
            exit_code: Some(exit_code),
            stdout: format!("{failed} failed, {passed} passed, {errors} errors"),
            ..Self::default()
        }
    }

    /// A run that was killed after the timeout.
    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }
}

/// Runner double that replays [`ScriptedRun`]s in order.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    runs: RefCell<VecDeque<Result<ScriptedRun, String>>>,
    seen_modules: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, run: ScriptedRun) -> Self {
        self.runs.borrow_mut().push_back(Ok(run));
        self
    }

    /// Queue a runner that fails to start.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.runs.borrow_mut().push_back(Err(message.into()));
        self
    }

    /// Module contents passed to each run, in order.
    pub fn seen_modules(&self) -> Vec<String> {
        self.seen_modules.borrow().clone()
    }

    pub fn run_count(&self) -> usize {
        self.seen_modules.borrow().len()
    }
}

impl TestRunner for ScriptedRunner {
    fn run(&self, request: &ExecutionRequest) -> Result<RunOutput> {
        self.seen_modules
            .borrow_mut()
            .push(fs::read_to_string(&request.test_path)?);
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted run left"))?
            .map_err(|message| anyhow!(message))?;
        if let Some(report) = &run.report {
            fs::write(&request.report_path, serde_json::to_string(report)?)?;
        }
        Ok(RunOutput {
            exit_code: run.exit_code,
            stdout: run.stdout,
            stderr: run.stderr,
            timed_out: run.timed_out,
        })
    }
}

/// A pytest-json-report document with the given counts.
///
/// Tests are listed passed first, then failed, then errored, with node ids
/// `test_combined.py::test_{i}`.
pub fn report_json(collected: u32, passed: u32, failed: u32, errors: u32) -> Value {
    let mut tests = Vec::new();
    let mut index = 0u32;
    let mut push = |outcome: &str, longrepr: Option<String>| {
        let mut test = json!({
            "nodeid": format!("test_combined.py::test_{index}"),
            "outcome": outcome,
        });
        if let Some(longrepr) = longrepr {
            test["call"] = json!({ "longrepr": longrepr });
        }
        tests.push(test);
        index += 1;
    };
    for _ in 0..passed {
        push("passed", None);
    }
    for _ in 0..failed {
        push("failed", Some("AssertionError: assert 1 == 2".to_string()));
    }
    for _ in 0..errors {
        push("error", Some("NameError: name 'missing' is not defined".to_string()));
    }
    json!({
        "summary": {
            "collected": collected,
            "passed": passed,
            "failed": failed,
            "errors": errors,
        },
        "tests": tests,
    })
}

/// Config whose model names match the scripted reply queues:
/// `gen`, `critic` and `reporter`.
pub fn test_config() -> LoopConfig {
    LoopConfig {
        llm: LlmConfig {
            generator: ModelSettings::new("gen", 0.2),
            critic: ModelSettings::new("critic", 0.1),
            reporter: ModelSettings::new("reporter", 0.3),
            ..LlmConfig::default()
        },
        ..LoopConfig::default()
    }
}
