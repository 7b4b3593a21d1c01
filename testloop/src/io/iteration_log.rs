//! Per-run artifact directories under `<artifacts_dir>/runs/`.
//!
//! Artifacts are product output for humans inspecting a run. They are written
//! best-effort by the workflow; a failed write never changes the loop outcome.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use serde::Serialize;

use crate::core::types::Verdict;

/// Unique directory for one workflow run.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub run_id: String,
    pub path: PathBuf,
}

impl RunDir {
    pub fn iteration_paths(&self, iteration: u32) -> IterationPaths {
        IterationPaths::new(&self.path, iteration)
    }

    pub fn state_path(&self) -> PathBuf {
        self.path.join("state.json")
    }
}

/// Claim `<artifacts_dir>/runs/run-YYYYMMDD-HHMMSS[-N]`.
///
/// The directory is created non-recursively, so two processes racing for the
/// same timestamp get different suffixes.
pub fn claim_run_dir(artifacts_dir: &Path) -> Result<RunDir> {
    let runs = artifacts_dir.join("runs");
    fs::create_dir_all(&runs).with_context(|| format!("create {}", runs.display()))?;
    // pytest runs with the run dir as its working directory.
    let runs = runs
        .canonicalize()
        .with_context(|| format!("resolve {}", runs.display()))?;
    let base = format!("run-{}", Local::now().format("%Y%m%d-%H%M%S"));

    for suffix in 1..=999u32 {
        let run_id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        let path = runs.join(&run_id);
        match fs::create_dir(&path) {
            Ok(()) => return Ok(RunDir { run_id, path }),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("create run dir {}", path.display()));
            }
        }
    }

    Err(anyhow!(
        "unable to claim a unique run dir from base '{base}' under {}",
        runs.display()
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    pub verdict: Verdict,
    /// `None` when the attempt never reached execution.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub collected: u32,
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub feedback: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub test_code_path: PathBuf,
    pub combined_path: PathBuf,
    pub execution_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(run_dir: &Path, iteration: u32) -> Self {
        let dir = run_dir.join("iterations").join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            test_code_path: dir.join("test_code.py"),
            combined_path: dir.join("combined.py"),
            execution_log_path: dir.join("execution.log"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub run_dir: &'a RunDir,
    pub meta: &'a IterationMeta,
    pub test_code: &'a str,
    pub combined_code: &'a str,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub output_limit_bytes: usize,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = request.run_dir.iteration_paths(request.meta.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, request.meta)?;
    write_text(&paths.test_code_path, request.test_code)?;
    write_text(&paths.combined_path, request.combined_code)?;
    write_text(
        &paths.execution_log_path,
        &execution_log(request.stdout, request.stderr, request.output_limit_bytes),
    )?;
    Ok(paths)
}

/// Write the frozen workflow state as `state.json`.
pub fn write_state<T: Serialize>(run_dir: &RunDir, state: &T) -> Result<PathBuf> {
    let path = run_dir.state_path();
    write_json(&path, state)?;
    Ok(path)
}

fn execution_log(stdout: &str, stderr: &str, limit: usize) -> String {
    let buf = format!("=== stdout ===\n{stdout}\n=== stderr ===\n{stderr}\n");
    if buf.len() <= limit {
        return buf;
    }
    let mut cut = limit;
    while !buf.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]\n", &buf[..cut], buf.len() - cut)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(run_id: &str) -> IterationMeta {
        IterationMeta {
            run_id: run_id.to_string(),
            iteration: 2,
            verdict: Verdict::NeedsFix,
            exit_code: Some(1),
            timed_out: false,
            collected: 3,
            passed: 2,
            failed: 1,
            errors: 0,
            feedback: "fix test_c".to_string(),
            duration_ms: 15,
        }
    }

    #[test]
    fn claimed_run_dirs_are_unique() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = claim_run_dir(temp.path()).expect("first");
        let second = claim_run_dir(temp.path()).expect("second");
        assert_ne!(first.path, second.path);
        assert!(first.path.is_dir() && second.path.is_dir());
        assert!(first.run_id.starts_with("run-"));
        let runs = temp.path().join("runs").canonicalize().expect("runs");
        assert!(first.path.starts_with(&runs));
        assert!(first.path.is_absolute());
    }

    #[test]
    fn iteration_paths_are_stable() {
        let paths = IterationPaths::new(Path::new("/tmp/run-1"), 3);
        assert!(paths.dir.ends_with("iterations/3"));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.test_code_path.ends_with("test_code.py"));
        assert!(paths.combined_path.ends_with("combined.py"));
        assert!(paths.execution_log_path.ends_with("execution.log"));
    }

    #[test]
    fn writes_iteration_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run_dir = claim_run_dir(temp.path()).expect("run dir");
        let meta = meta(&run_dir.run_id);

        let paths = write_iteration(&IterationWriteRequest {
            run_dir: &run_dir,
            meta: &meta,
            test_code: "def test_c(): ...",
            combined_code: "def c(): ...\n\ndef test_c(): ...",
            stdout: "1 failed, 2 passed",
            stderr: "",
            output_limit_bytes: 10_000,
        })
        .expect("write");

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("meta"))
                .expect("json");
        assert_eq!(written["verdict"], "needs_fix");
        assert_eq!(written["passed"], 2);
        assert!(paths.combined_path.is_file());
        let log = fs::read_to_string(&paths.execution_log_path).expect("log");
        assert!(log.starts_with("=== stdout ===\n1 failed, 2 passed"));
    }

    #[test]
    fn execution_log_is_bounded() {
        let log = execution_log(&"é".repeat(100), "", 51);
        assert!(log.contains("[truncated"));
        assert!(log.len() < 100);
    }
}
