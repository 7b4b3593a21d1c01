//! Investigation tests against a real model endpoint and a real pytest.
//!
//! Excluded from regular runs because they need network access, an API key
//! and a Python environment with `pytest` and `pytest-json-report`.
//!
//! # Prerequisites
//!
//! - `GROQ_API_KEY` (or the variable named by `llm.api_key_env`) set
//! - `pytest` and `pytest-json-report` installed
//!
//! # Running
//!
//! ```bash
//! cargo test -p testloop --test investigation_llm -- --ignored
//! ```

use std::process::Command;
use std::time::Duration;

use testloop::core::types::Verdict;
use testloop::io::config::LoopConfig;
use testloop::io::iteration_log::claim_run_dir;
use testloop::io::llm::{ChatClient, Credential, GenerationRequest, TextGenerator};
use testloop::io::runner::{ExecutionRequest, PytestRunner, execute};
use testloop::workflow::{RunSpec, Workflow};

fn client(config: &LoopConfig) -> ChatClient {
    let credential = Credential::from_env(&config.llm.api_key_env).expect("api key");
    ChatClient::new(&config.llm, credential).expect("client")
}

#[test]
#[ignore]
fn pytest_json_report_available() {
    let output = Command::new("pytest")
        .arg("--help")
        .output()
        .expect("pytest not in PATH - install with: pip install pytest pytest-json-report");
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(
        help.contains("--json-report"),
        "pytest-json-report plugin missing"
    );
}

#[test]
#[ignore]
fn chat_client_returns_text() {
    let config = LoopConfig::default();
    let client = client(&config);
    let reply = client
        .generate(&GenerationRequest::new(
            &config.llm.generator,
            "Reply with the single word: pong",
        ))
        .expect("generate");
    println!("reply: {reply}");
    assert!(!reply.trim().is_empty());
}

/// A passing module runs through the real adapter with a parsed report.
#[test]
#[ignore]
fn pytest_runner_reports_counts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let request = ExecutionRequest::in_dir(temp.path(), Duration::from_secs(60), 200_000);

    let result = execute(
        &PytestRunner::new(&config.pytest),
        &request,
        "def test_ok():\n    assert 1 + 1 == 2\n\n\ndef test_bad():\n    assert 1 == 2\n",
    )
    .expect("execute");

    let report = result.report.expect("report");
    assert_eq!(report.summary.collected, 2);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(result.exit_code, 1);
}

/// Full loop for a trivial function; expected to converge within the budget.
#[test]
#[ignore]
fn full_loop_converges_for_add() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig::default();
    let client = client(&config);
    let runner = PytestRunner::new(&config.pytest);
    let run_dir = claim_run_dir(temp.path()).expect("run dir");

    let state = Workflow::new(&client, &runner, &config)
        .run(
            &RunSpec {
                spec_text: "# Math\n\n`add(a, b)` returns the sum of two numbers.".to_string(),
                source_text: Some("def add(a, b):\n    return a + b\n".to_string()),
                max_iterations: 3,
            },
            &run_dir,
            |event| println!("{event:?}"),
        )
        .expect("workflow");

    println!("{}", state.final_message);
    assert_eq!(state.verdict, Verdict::Success);
}
