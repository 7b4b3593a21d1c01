//! Loop controller: detect, generate, combine, execute, critique, report.
//!
//! The controller owns the [`WorkflowState`] and is the only place that
//! decides transitions. Component faults inside an iteration are converted
//! into a `needs_fix` verdict with explanatory feedback, so a run always ends
//! in the reporter with a defined verdict. Only the startup preconditions
//! checked in [`Workflow::run`] return `Err`.

use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::critic::{Critic, CritiqueInputs};
use crate::agents::reporter::{ReportInputs, Reporter};
use crate::agents::synthesizer::{SynthesisInputs, Synthesizer};
use crate::core::combine::{CombineRequest, combine};
use crate::core::extract::{self, NameOrigin};
use crate::core::report::{ReportSummary, TestReport};
use crate::core::routing::{Route, STALL_WINDOW, is_stalled, route};
use crate::core::types::{Agent, Framework, HistoryEntry, IterationRecord, Verdict};
use crate::io::config::LoopConfig;
use crate::io::iteration_log::{
    IterationMeta, IterationWriteRequest, RunDir, write_iteration, write_state,
};
use crate::io::llm::TextGenerator;
use crate::io::runner::{ExecutionRequest, ExecutionResult, TestRunner, execute};

/// Immutable input to one run.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub spec_text: String,
    pub source_text: Option<String>,
    pub max_iterations: u32,
}

/// The single mutable aggregate threaded through the loop.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub run_id: String,
    /// 1-based index of the current attempt.
    pub iteration: u32,
    pub max_iterations: u32,
    pub functions: Vec<String>,
    pub framework: Framework,
    pub test_code: String,
    pub combined_code: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` until the first execution.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub report: Option<TestReport>,
    pub verdict: Verdict,
    pub feedback: String,
    pub history: Vec<HistoryEntry>,
    pub records: Vec<IterationRecord>,
    pub final_message: String,
}

impl WorkflowState {
    fn new(run_id: String, max_iterations: u32) -> Self {
        Self {
            run_id,
            iteration: 1,
            max_iterations,
            functions: Vec::new(),
            framework: Framework::Generic,
            test_code: String::new(),
            combined_code: String::new(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            report: None,
            verdict: Verdict::Unknown,
            feedback: String::new(),
            history: Vec::new(),
            records: Vec::new(),
            final_message: String::new(),
        }
    }

    fn log(&mut self, agent: Agent, action: impl Into<String>) {
        self.history.push(HistoryEntry {
            iteration: self.iteration,
            agent,
            action: action.into(),
        });
    }

    /// Record a verdict for the current attempt.
    ///
    /// Retry-class verdicts advance the iteration counter here and nowhere else.
    pub fn record_verdict(&mut self, agent: Agent, verdict: Verdict, feedback: String) {
        self.log(agent, format!("Verdict: {verdict}"));
        self.verdict = verdict;
        self.feedback = feedback;
        if verdict.is_retry() {
            self.iteration += 1;
        }
    }

    fn apply_execution(&mut self, result: ExecutionResult) {
        let record = IterationRecord::from_report(self.iteration, result.report.as_ref());
        self.log(
            Agent::Executor,
            format!(
                "Executed tests - exit code {} ({} collected, {} passed)",
                result.exit_code, record.collected, record.passed
            ),
        );
        self.records.push(record);
        self.exit_code = Some(result.exit_code);
        self.timed_out = result.timed_out;
        self.report = result.report;
        self.stdout = result.stdout;
        self.stderr = result.stderr;
    }

    pub fn succeeded(&self) -> bool {
        self.verdict == Verdict::Success
    }

    pub fn last_summary(&self) -> ReportSummary {
        ReportSummary::of(self.report.as_ref())
    }
}

/// Controller stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Detect,
    Generate,
    Combine,
    Execute,
    Critique,
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Detect => "detect",
            Stage::Generate => "generate",
            Stage::Combine => "combine",
            Stage::Execute => "execute",
            Stage::Critique => "critique",
            Stage::Report => "report",
        }
    }
}

/// Progress notification delivered after each stage.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    Detected {
        functions: Vec<String>,
        framework: Framework,
    },
    Generated {
        iteration: u32,
        code_chars: usize,
    },
    Combined {
        iteration: u32,
    },
    Executed {
        record: IterationRecord,
        exit_code: i32,
        timed_out: bool,
    },
    Critiqued {
        iteration: u32,
        verdict: Verdict,
        consulted_model: bool,
    },
    Faulted {
        iteration: u32,
        stage: Stage,
        error: String,
    },
    Finished {
        verdict: Verdict,
        iterations: u32,
    },
}

/// One configured controller. Generic over the model and test backends.
pub struct Workflow<'a, G: TextGenerator, R: TestRunner> {
    generator: &'a G,
    runner: &'a R,
    config: &'a LoopConfig,
    synthesizer: Synthesizer,
    critic: Critic,
    reporter: Reporter,
}

impl<'a, G: TextGenerator, R: TestRunner> Workflow<'a, G, R> {
    pub fn new(generator: &'a G, runner: &'a R, config: &'a LoopConfig) -> Self {
        Self {
            generator,
            runner,
            config,
            synthesizer: Synthesizer::new(config.llm.generator.clone(), config.context_char_budget),
            critic: Critic::new(config.llm.critic.clone()),
            reporter: Reporter::new(config.llm.reporter.clone()),
        }
    }

    /// Run the loop to completion, calling `on_event` after every stage.
    ///
    /// Errors only for an empty specification or a zero iteration budget.
    #[instrument(skip_all, fields(run_id = %run_dir.run_id, max_iterations = spec.max_iterations))]
    pub fn run<F: FnMut(&WorkflowEvent)>(
        &self,
        spec: &RunSpec,
        run_dir: &RunDir,
        mut on_event: F,
    ) -> Result<WorkflowState> {
        ensure!(
            !spec.spec_text.trim().is_empty(),
            "specification text is empty"
        );
        ensure!(spec.max_iterations > 0, "max_iterations must be > 0");

        let mut state = WorkflowState::new(run_dir.run_id.clone(), spec.max_iterations);
        let mut started = Instant::now();
        let mut stage = Stage::Detect;

        loop {
            stage = match stage {
                Stage::Detect => {
                    self.detect(spec, &mut state);
                    on_event(&WorkflowEvent::Detected {
                        functions: state.functions.clone(),
                        framework: state.framework,
                    });
                    Stage::Generate
                }
                Stage::Generate => {
                    started = Instant::now();
                    match self.generate(spec, &state) {
                        Ok(code) => {
                            state.log(Agent::Generator, "Generated test code");
                            state.test_code = code;
                            on_event(&WorkflowEvent::Generated {
                                iteration: state.iteration,
                                code_chars: state.test_code.len(),
                            });
                            if spec.source_text.is_some() {
                                Stage::Combine
                            } else {
                                state.combined_code = state.test_code.clone();
                                Stage::Execute
                            }
                        }
                        Err(err) => {
                            let fault = Fault::new(Stage::Generate, Agent::Generator, &err);
                            self.fault(&mut state, run_dir, started, fault, &mut on_event)
                        }
                    }
                }
                Stage::Combine => {
                    let source = spec.source_text.as_deref().unwrap_or_default();
                    state.combined_code = combine(&CombineRequest {
                        user_source: source,
                        function_names: &state.functions,
                        framework: state.framework,
                        test_code: &state.test_code,
                        keep_imports: &self.config.keep_imports,
                    });
                    state.log(
                        Agent::Combiner,
                        format!("Combined user source with tests ({} framework)", state.framework),
                    );
                    on_event(&WorkflowEvent::Combined {
                        iteration: state.iteration,
                    });
                    Stage::Execute
                }
                Stage::Execute => {
                    let request = ExecutionRequest::in_dir(
                        &run_dir.path,
                        Duration::from_secs(self.config.execution_timeout_secs),
                        self.config.output_limit_bytes,
                    );
                    match execute(self.runner, &request, &state.combined_code) {
                        Ok(result) => {
                            state.apply_execution(result);
                            if let (Some(record), Some(exit_code)) =
                                (state.records.last().copied(), state.exit_code)
                            {
                                on_event(&WorkflowEvent::Executed {
                                    record,
                                    exit_code,
                                    timed_out: state.timed_out,
                                });
                            }
                            Stage::Critique
                        }
                        Err(err) => {
                            let fault = Fault::new(Stage::Execute, Agent::Executor, &err);
                            self.fault(&mut state, run_dir, started, fault, &mut on_event)
                        }
                    }
                }
                Stage::Critique => {
                    let execution = ExecutionResult {
                        exit_code: state.exit_code.unwrap_or_default(),
                        report: state.report.clone(),
                        stdout: state.stdout.clone(),
                        stderr: state.stderr.clone(),
                        timed_out: state.timed_out,
                    };
                    let critique = self.critic.critique(
                        self.generator,
                        &CritiqueInputs {
                            iteration: state.iteration,
                            max_iterations: state.max_iterations,
                            framework: state.framework,
                            functions: &state.functions,
                            execution: &execution,
                            test_code: &state.test_code,
                        },
                    );
                    on_event(&WorkflowEvent::Critiqued {
                        iteration: state.iteration,
                        verdict: critique.verdict,
                        consulted_model: critique.consulted_model,
                    });
                    let outcome = AttemptOutcome {
                        agent: Agent::Critic,
                        verdict: critique.verdict,
                        feedback: critique.feedback,
                        faulted: None,
                    };
                    self.conclude(&mut state, run_dir, started, outcome)
                }
                Stage::Report => {
                    self.report(&mut state, run_dir);
                    on_event(&WorkflowEvent::Finished {
                        verdict: state.verdict,
                        iterations: u32::try_from(state.records.len()).unwrap_or(u32::MAX),
                    });
                    return Ok(state);
                }
            };
        }
    }

    fn detect(&self, spec: &RunSpec, state: &mut WorkflowState) {
        let detection = extract::detect(
            &spec.spec_text,
            spec.source_text.as_deref(),
            self.config.max_functions,
            self.config.name_precedence,
        );
        let origin = match detection.origin {
            NameOrigin::Source => "source",
            NameOrigin::Spec => "specification",
            NameOrigin::Empty => "nowhere",
        };
        info!(
            functions = detection.functions.len(),
            framework = %detection.framework,
            origin,
            "detected functions"
        );
        state.functions = detection.functions;
        state.framework = detection.framework;
        state.log(
            Agent::Detector,
            format!(
                "Detected {} functions from {origin}; framework {}",
                state.functions.len(),
                state.framework
            ),
        );
    }

    fn generate(&self, spec: &RunSpec, state: &WorkflowState) -> Result<String> {
        let retry = !state.feedback.is_empty();
        self.synthesizer.synthesize(
            self.generator,
            &SynthesisInputs {
                functions: &state.functions,
                framework: state.framework,
                spec_text: &spec.spec_text,
                source_text: spec.source_text.as_deref(),
                feedback: retry.then_some(state.feedback.as_str()),
                previous_code: (retry && !state.test_code.is_empty())
                    .then_some(state.test_code.as_str()),
            },
        )
    }

    /// Map a component fault to a `needs_fix` verdict for this attempt.
    fn fault(
        &self,
        state: &mut WorkflowState,
        run_dir: &RunDir,
        started: Instant,
        fault: Fault,
        on_event: &mut impl FnMut(&WorkflowEvent),
    ) -> Stage {
        warn!(stage = fault.stage.as_str(), err = %fault.error, "component fault");
        on_event(&WorkflowEvent::Faulted {
            iteration: state.iteration,
            stage: fault.stage,
            error: fault.error.clone(),
        });
        let feedback = format!(
            "The {} step failed: {}. Produce a complete, self-contained pytest module.",
            fault.stage.as_str(),
            fault.error
        );
        let outcome = AttemptOutcome {
            agent: fault.agent,
            verdict: Verdict::NeedsFix,
            feedback,
            faulted: Some(fault.stage),
        };
        self.conclude(state, run_dir, started, outcome)
    }

    /// Record the attempt's verdict, write its artifacts, and route.
    fn conclude(
        &self,
        state: &mut WorkflowState,
        run_dir: &RunDir,
        started: Instant,
        outcome: AttemptOutcome,
    ) -> Stage {
        let AttemptOutcome {
            agent,
            verdict,
            feedback,
            faulted,
        } = outcome;
        let attempt = state.iteration;
        state.record_verdict(agent, verdict, feedback);
        self.write_artifacts(state, run_dir, attempt, started, faulted);

        let stalled = self.config.stall_detection && is_stalled(&state.records, STALL_WINDOW);
        match route(verdict, state.iteration, state.max_iterations, stalled) {
            Route::Generate => {
                info!(next_iteration = state.iteration, %verdict, "retrying");
                Stage::Generate
            }
            Route::Report(final_verdict) => {
                if final_verdict != verdict {
                    info!(%verdict, %final_verdict, "controller overrides verdict");
                    state.verdict = final_verdict;
                    state.log(agent, format!("Loop stopped: {final_verdict}"));
                }
                Stage::Report
            }
        }
    }

    fn report(&self, state: &mut WorkflowState, run_dir: &RunDir) {
        let message = self.reporter.report(
            self.generator,
            &ReportInputs {
                verdict: state.verdict,
                iterations: u32::try_from(state.records.len()).unwrap_or(u32::MAX),
                max_iterations: state.max_iterations,
                framework: state.framework,
                functions: &state.functions,
                summary: state.last_summary(),
                feedback: &state.feedback,
                stderr: &state.stderr,
            },
        );
        state.final_message = message;
        state.log(Agent::Reporter, "Generated final report");
        if let Err(err) = write_state(run_dir, state) {
            warn!(err = %format!("{err:#}"), "failed to write final state");
        }
    }

    /// Write `iterations/<attempt>/`. Fields from a stage the attempt never
    /// reached are left empty rather than carried over from the last attempt.
    fn write_artifacts(
        &self,
        state: &WorkflowState,
        run_dir: &RunDir,
        attempt: u32,
        started: Instant,
        faulted: Option<Stage>,
    ) {
        let executed = state.records.last().is_some_and(|r| r.iteration == attempt);
        let generated = faulted != Some(Stage::Generate);
        let combined = generated && faulted != Some(Stage::Combine);
        let summary = if executed {
            state.last_summary()
        } else {
            ReportSummary::default()
        };
        let meta = IterationMeta {
            run_id: run_dir.run_id.clone(),
            iteration: attempt,
            verdict: state.verdict,
            exit_code: state.exit_code.filter(|_| executed),
            timed_out: executed && state.timed_out,
            collected: summary.collected,
            passed: summary.passed,
            failed: summary.failed,
            errors: summary.errors,
            feedback: state.feedback.clone(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let written = write_iteration(&IterationWriteRequest {
            run_dir,
            meta: &meta,
            test_code: reached(&state.test_code, generated),
            combined_code: reached(&state.combined_code, combined),
            stdout: reached(&state.stdout, executed),
            stderr: reached(&state.stderr, executed),
            output_limit_bytes: self.config.output_limit_bytes,
        });
        if let Err(err) = written {
            warn!(iteration = attempt, err = %format!("{err:#}"), "failed to write iteration artifacts");
        }
    }
}

fn reached(text: &str, stage_reached: bool) -> &str {
    if stage_reached { text } else { "" }
}

/// What ended one attempt.
struct AttemptOutcome {
    agent: Agent,
    verdict: Verdict,
    feedback: String,
    /// Stage whose fault ended the attempt, if any.
    faulted: Option<Stage>,
}

struct Fault {
    stage: Stage,
    agent: Agent,
    error: String,
}

impl Fault {
    fn new(stage: Stage, agent: Agent, err: &anyhow::Error) -> Self {
        Self {
            stage,
            agent,
            error: format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_verdicts_advance_the_iteration() {
        let mut state = WorkflowState::new("run-1".to_string(), 3);
        state.record_verdict(Agent::Critic, Verdict::NeedsFix, "fix".to_string());
        assert_eq!(state.iteration, 2);
        state.record_verdict(Agent::Critic, Verdict::Incomplete, "more".to_string());
        assert_eq!(state.iteration, 3);
        state.record_verdict(Agent::Critic, Verdict::Success, "ok".to_string());
        assert_eq!(state.iteration, 3);
        state.record_verdict(Agent::Critic, Verdict::Unknown, "?".to_string());
        assert_eq!(state.iteration, 3);
        assert_eq!(state.history.len(), 4);
        assert_eq!(state.history[0].iteration, 1);
        assert_eq!(state.history[0].agent, Agent::Critic);
    }

    #[test]
    fn execution_appends_a_record_for_the_current_iteration() {
        let mut state = WorkflowState::new("run-1".to_string(), 3);
        state.iteration = 2;
        state.apply_execution(ExecutionResult {
            exit_code: -1,
            report: None,
            stdout: String::new(),
            stderr: "boom".to_string(),
            timed_out: true,
        });
        assert_eq!(state.records.len(), 1);
        assert_eq!(state.records[0].iteration, 2);
        assert_eq!(state.records[0].collected, 0);
        assert_eq!(state.exit_code, Some(-1));
        assert!(state.timed_out);
        assert_eq!(state.last_summary(), ReportSummary::default());
    }
}
