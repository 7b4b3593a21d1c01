//! Execution adapter: run the combined module under pytest and read its report.
//!
//! The [`TestRunner`] trait decouples the loop from the real `pytest`
//! subprocess. Tests use scripted runners that write a report file without
//! spawning Python.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::report::TestReport;
use crate::io::config::PytestConfig;
use crate::io::process::run_command_with_timeout;

/// File name of the combined module inside the run directory.
pub const COMBINED_FILE: &str = "test_combined.py";
/// File name of the structured report inside the run directory.
pub const REPORT_FILE: &str = ".report.json";
/// Exit code reported when pytest did not exit normally (timeout, spawn failure, signal).
pub const ABNORMAL_EXIT_CODE: i32 = -1;

/// Parameters for one test run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Working directory for pytest; also holds the combined module and report.
    pub workdir: PathBuf,
    pub test_path: PathBuf,
    pub report_path: PathBuf,
    pub timeout: Duration,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl ExecutionRequest {
    /// Request using the fixed file names inside `run_dir`.
    pub fn in_dir(run_dir: &Path, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: run_dir.to_path_buf(),
            test_path: run_dir.join(COMBINED_FILE),
            report_path: run_dir.join(REPORT_FILE),
            timeout,
            output_limit_bytes,
        }
    }
}

/// Raw outcome of a runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Abstraction over test runner backends.
pub trait TestRunner {
    /// Run `request.test_path`, writing the structured report to `request.report_path`.
    fn run(&self, request: &ExecutionRequest) -> Result<RunOutput>;
}

/// Runner that spawns pytest with the `pytest-json-report` plugin.
#[derive(Debug, Clone)]
pub struct PytestRunner {
    command: Vec<String>,
    max_fail: u32,
}

impl PytestRunner {
    pub fn new(config: &PytestConfig) -> Self {
        Self {
            command: config.command.clone(),
            max_fail: config.max_fail,
        }
    }
}

impl TestRunner for PytestRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &ExecutionRequest) -> Result<RunOutput> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("pytest command is empty"))?;
        info!(workdir = %request.workdir.display(), %program, "starting pytest");

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg(&request.test_path)
            .arg("--disable-warnings")
            .arg(format!("--maxfail={}", self.max_fail))
            .arg("--json-report")
            .arg(format!("--json-report-file={}", request.report_path.display()))
            .arg("-q")
            .arg("-p")
            .arg("no:cacheprovider")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .current_dir(&request.workdir);

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .context("run pytest")?;
        debug!(exit_code = ?output.exit_code(), timed_out = output.timed_out, "pytest finished");
        Ok(RunOutput {
            exit_code: output.exit_code(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            timed_out: output.timed_out,
        })
    }
}

/// Normalized outcome of one execution attempt.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub report: Option<TestReport>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Write the combined module, run it, and load the fresh report.
///
/// Runner failures and timeouts are folded into the result (exit code
/// [`ABNORMAL_EXIT_CODE`], no report). Only failing to write the module or to
/// clear a stale report is an error.
#[instrument(skip_all, fields(test_path = %request.test_path.display()))]
pub fn execute<R: TestRunner>(
    runner: &R,
    request: &ExecutionRequest,
    combined_code: &str,
) -> Result<ExecutionResult> {
    fs::create_dir_all(&request.workdir)
        .with_context(|| format!("create run dir {}", request.workdir.display()))?;
    fs::write(&request.test_path, combined_code)
        .with_context(|| format!("write {}", request.test_path.display()))?;
    remove_stale_report(&request.report_path)?;

    let output = match runner.run(request) {
        Ok(output) => output,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "test runner failed to run");
            return Ok(ExecutionResult {
                exit_code: ABNORMAL_EXIT_CODE,
                report: None,
                stdout: String::new(),
                stderr: format!("test runner failed to start: {err:#}"),
                timed_out: false,
            });
        }
    };

    if output.timed_out {
        warn!(timeout_secs = request.timeout.as_secs(), "test run timed out");
        let mut stderr = output.stderr;
        stderr.push_str(&format!(
            "\n[test run timed out after {}s and was killed]\n",
            request.timeout.as_secs()
        ));
        return Ok(ExecutionResult {
            exit_code: ABNORMAL_EXIT_CODE,
            report: None,
            stdout: output.stdout,
            stderr,
            timed_out: true,
        });
    }

    let report = load_report(&request.report_path);
    if report.is_none() {
        debug!(path = %request.report_path.display(), "no usable report");
    }
    Ok(ExecutionResult {
        exit_code: output.exit_code.unwrap_or(ABNORMAL_EXIT_CODE),
        report,
        stdout: output.stdout,
        stderr: output.stderr,
        timed_out: false,
    })
}

/// Read and parse a report file. Absence or malformation yields `None`.
pub fn load_report(path: &Path) -> Option<TestReport> {
    let contents = fs::read_to_string(path).ok()?;
    TestReport::parse(&contents)
}

fn remove_stale_report(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale report");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove stale report {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeRunner {
        report: Option<String>,
        output: RunOutput,
        fail: bool,
        seen_code: RefCell<Option<String>>,
    }

    impl FakeRunner {
        fn new(report: Option<&str>, output: RunOutput) -> Self {
            Self {
                report: report.map(str::to_string),
                output,
                fail: false,
                seen_code: RefCell::new(None),
            }
        }
    }

    impl TestRunner for FakeRunner {
        fn run(&self, request: &ExecutionRequest) -> Result<RunOutput> {
            *self.seen_code.borrow_mut() = Some(fs::read_to_string(&request.test_path)?);
            if self.fail {
                return Err(anyhow!("pytest not installed"));
            }
            if let Some(report) = &self.report {
                fs::write(&request.report_path, report)?;
            }
            Ok(self.output.clone())
        }
    }

    fn request(dir: &Path) -> ExecutionRequest {
        ExecutionRequest::in_dir(dir, Duration::from_secs(5), 10_000)
    }

    #[test]
    fn writes_module_and_reads_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = FakeRunner::new(
            Some(r#"{"summary": {"collected": 1, "passed": 1}}"#),
            RunOutput {
                exit_code: Some(0),
                stdout: "1 passed".to_string(),
                ..RunOutput::default()
            },
        );

        let result = execute(&runner, &request(temp.path()), "def test_a(): pass\n").expect("execute");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.report.expect("report").summary.passed, 1);
        assert_eq!(
            runner.seen_code.borrow().as_deref(),
            Some("def test_a(): pass\n")
        );
    }

    #[test]
    fn stale_report_is_not_reused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        fs::write(&req.report_path, r#"{"summary": {"collected": 9, "passed": 9}}"#)
            .expect("stale report");
        let runner = FakeRunner::new(
            None,
            RunOutput {
                exit_code: Some(2),
                stderr: "SyntaxError".to_string(),
                ..RunOutput::default()
            },
        );

        let result = execute(&runner, &req, "def broken(:\n").expect("execute");
        assert!(result.report.is_none());
        assert_eq!(result.exit_code, 2);
        assert!(!req.report_path.exists());
    }

    #[test]
    fn timeout_maps_to_sentinel_without_report() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = FakeRunner::new(
            Some(r#"{"summary": {"collected": 1, "passed": 1}}"#),
            RunOutput {
                exit_code: None,
                timed_out: true,
                ..RunOutput::default()
            },
        );

        let result = execute(&runner, &request(temp.path()), "x = 1\n").expect("execute");
        assert_eq!(result.exit_code, ABNORMAL_EXIT_CODE);
        assert!(result.timed_out);
        assert!(result.report.is_none());
        assert!(result.stderr.contains("timed out after 5s"));
    }

    #[test]
    fn runner_error_becomes_a_failed_result() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut runner = FakeRunner::new(None, RunOutput::default());
        runner.fail = true;

        let result = execute(&runner, &request(temp.path()), "x = 1\n").expect("execute");
        assert_eq!(result.exit_code, ABNORMAL_EXIT_CODE);
        assert!(result.report.is_none());
        assert!(!result.timed_out);
        assert!(result.stderr.contains("pytest not installed"));
    }

    #[test]
    fn malformed_report_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(REPORT_FILE);
        fs::write(&path, "{truncated").expect("write");
        assert!(load_report(&path).is_none());
        assert!(load_report(&temp.path().join("missing.json")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn pytest_runner_passes_report_flags() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = r#"for a in "$@"; do case "$a" in --json-report-file=*) f="${a#--json-report-file=}";; esac; done
printf '%s' "$*" > args.txt
printf '{"summary": {"collected": 2, "passed": 1, "failed": 1}}' > "$f"
echo "1 failed, 1 passed"
exit 1"#;
        let runner = PytestRunner::new(&PytestConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "fake-pytest".to_string(),
            ],
            max_fail: 7,
        });

        let req = request(temp.path());
        let result = execute(&runner, &req, "def test_a(): pass\n").expect("execute");
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stdout.trim(), "1 failed, 1 passed");
        let summary = result.report.expect("report").summary;
        assert_eq!((summary.collected, summary.passed, summary.failed), (2, 1, 1));

        let args = fs::read_to_string(temp.path().join("args.txt")).expect("args");
        assert!(args.contains("--disable-warnings"));
        assert!(args.contains("--maxfail=7"));
        assert!(args.contains("--json-report "));
        assert!(args.contains(COMBINED_FILE));
    }
}
