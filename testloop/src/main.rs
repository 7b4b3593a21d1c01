//! testloop CLI.
//!
//! `testloop run` drives the generate/execute/critique loop against a README
//! and the Python source it describes, then writes the final test module to
//! `test_final_generated.py` (success) or `test_final_failed.py`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use testloop::core::extract::detect;
use testloop::exit_codes;
use testloop::io::config::{DEFAULT_CONFIG_FILE, LoopConfig, load_config, write_config};
use testloop::io::iteration_log::claim_run_dir;
use testloop::io::llm::{ChatClient, Credential};
use testloop::io::runner::PytestRunner;
use testloop::logging;
use testloop::workflow::{RunSpec, Workflow, WorkflowEvent, WorkflowState};

const SUCCESS_FILE: &str = "test_final_generated.py";
const FAILURE_FILE: &str = "test_final_failed.py";

#[derive(Parser)]
#[command(
    name = "testloop",
    version,
    about = "Generate pytest suites with a language model and repair them until they pass"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate, run and repair tests for the functions a README describes.
    Run {
        /// README or other description of the functions under test.
        #[arg(long)]
        readme: PathBuf,
        /// Python source defining the functions.
        #[arg(long)]
        code: PathBuf,
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Config file (defaults to `testloop.toml` if present).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override `execution_timeout_secs` from the config.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Stop early when the passed count stops improving.
        #[arg(long)]
        stall_detection: bool,
        /// Directory for the final test module.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print the functions and framework a run would target. No model calls.
    Detect {
        #[arg(long)]
        readme: PathBuf,
        #[arg(long)]
        code: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a `testloop.toml` with default settings.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            readme,
            code,
            max_iterations,
            config,
            timeout_secs,
            stall_detection,
            out_dir,
        } => {
            let mut cfg = load_cli_config(config.as_deref())?;
            if let Some(max) = max_iterations {
                cfg.max_iterations = max;
            }
            if let Some(secs) = timeout_secs {
                cfg.execution_timeout_secs = secs;
            }
            cfg.stall_detection |= stall_detection;
            cfg.validate().context("invalid command-line overrides")?;
            cmd_run(&cfg, &readme, &code, &out_dir)
        }
        Command::Detect {
            readme,
            code,
            config,
        } => {
            let cfg = load_cli_config(config.as_deref())?;
            cmd_detect(&cfg, &readme, code.as_deref())
        }
        Command::InitConfig { force } => cmd_init_config(force),
    }
}

fn load_cli_config(path: Option<&Path>) -> Result<LoopConfig> {
    match path {
        Some(path) => {
            if !path.is_file() {
                bail!("config file {} not found", path.display());
            }
            load_config(path)
        }
        None => load_config(Path::new(DEFAULT_CONFIG_FILE)),
    }
}

fn read_input(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {what} {}", path.display()))
}

fn cmd_run(cfg: &LoopConfig, readme: &Path, code: &Path, out_dir: &Path) -> Result<i32> {
    let spec_text = read_input(readme, "README")?;
    let source_text = read_input(code, "source file")?;
    let credential = Credential::from_env(&cfg.llm.api_key_env)?;

    let generator = ChatClient::new(&cfg.llm, credential)?;
    let runner = PytestRunner::new(&cfg.pytest);
    let run_dir = claim_run_dir(&cfg.artifacts_dir)?;
    println!("run {} ({})", run_dir.run_id, run_dir.path.display());

    let spec = RunSpec {
        spec_text,
        source_text: Some(source_text),
        max_iterations: cfg.max_iterations,
    };
    let state = Workflow::new(&generator, &runner, cfg).run(&spec, &run_dir, |event| {
        println!("{}", progress_line(event));
    })?;

    let out_path = write_final_module(state.succeeded(), &state.test_code, out_dir)?;
    print_summary(&state, &out_path);
    Ok(if state.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::NOT_CONVERGED
    })
}

fn cmd_detect(cfg: &LoopConfig, readme: &Path, code: Option<&Path>) -> Result<i32> {
    let spec_text = read_input(readme, "README")?;
    let source_text = code.map(|path| read_input(path, "source file")).transpose()?;
    let detection = detect(
        &spec_text,
        source_text.as_deref(),
        cfg.max_functions,
        cfg.name_precedence,
    );
    println!("framework: {}", detection.framework);
    if detection.functions.is_empty() {
        println!("functions: (none detected)");
    } else {
        println!("functions: {}", detection.functions.join(", "));
    }
    Ok(exit_codes::OK)
}

fn cmd_init_config(force: bool) -> Result<i32> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &LoopConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Write the final synthesized test module. The executed module, with the
/// user source spliced in, stays in the run directory.
fn write_final_module(succeeded: bool, test_code: &str, out_dir: &Path) -> Result<PathBuf> {
    let name = if succeeded { SUCCESS_FILE } else { FAILURE_FILE };
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let path = out_dir.join(name);
    fs::write(&path, test_code).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

fn print_summary(state: &WorkflowState, out_path: &Path) {
    let summary = state.last_summary();
    println!();
    println!("verdict: {}", state.verdict);
    println!(
        "iterations: {} of {}",
        state.records.len(),
        state.max_iterations
    );
    println!(
        "last run: {} collected, {} passed, {} failed, {} errors",
        summary.collected, summary.passed, summary.failed, summary.errors
    );
    println!("tests written to {}", out_path.display());
    println!();
    println!("{}", state.final_message);
}

fn progress_line(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::Detected {
            functions,
            framework,
        } => format!(
            "[detect] {} functions ({framework}): {}",
            functions.len(),
            functions.join(", ")
        ),
        WorkflowEvent::Generated {
            iteration,
            code_chars,
        } => format!("[iter {iteration}] generated {code_chars} chars of test code"),
        WorkflowEvent::Combined { iteration } => {
            format!("[iter {iteration}] combined source and tests")
        }
        WorkflowEvent::Executed {
            record,
            exit_code,
            timed_out,
        } => {
            if *timed_out {
                format!("[iter {}] execution timed out", record.iteration)
            } else {
                format!(
                    "[iter {}] exit {exit_code}: {} collected, {} passed, {} failed, {} errors",
                    record.iteration, record.collected, record.passed, record.failed, record.errors
                )
            }
        }
        WorkflowEvent::Critiqued {
            iteration, verdict, ..
        } => format!("[iter {iteration}] verdict {verdict}"),
        WorkflowEvent::Faulted {
            iteration,
            stage,
            error,
        } => format!("[iter {iteration}] {} failed: {error}", stage.as_str()),
        WorkflowEvent::Finished {
            verdict,
            iterations,
        } => format!("[done] {verdict} after {iterations} iterations"),
    }
}
