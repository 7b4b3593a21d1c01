//! Loop configuration stored in `testloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::extract::NamePrecedence;

pub const DEFAULT_CONFIG_FILE: &str = "testloop.toml";

/// Loop configuration (TOML).
///
/// Missing fields fall back to defaults, so an empty file is a valid config.
/// Constructed once at startup and passed by reference; components never
/// consult the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Generate/execute/critique cycles before forced termination.
    pub max_iterations: u32,

    /// Upper bound on detected candidate functions.
    pub max_functions: usize,

    pub name_precedence: NamePrecedence,

    /// Wall-clock limit for one pytest invocation.
    pub execution_timeout_secs: u64,

    /// Truncate captured pytest stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Characters of README/source context included in generator prompts.
    pub context_char_budget: usize,

    /// End the loop as `stalled` after two iterations without more passing tests.
    pub stall_detection: bool,

    /// Root for per-run directories.
    pub artifacts_dir: PathBuf,

    /// Root modules whose imports survive when splicing user source.
    pub keep_imports: Vec<String>,

    pub pytest: PytestConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PytestConfig {
    /// Program and leading arguments (e.g. `["python", "-m", "pytest"]`).
    pub command: Vec<String>,
    /// Passed as `--maxfail`.
    pub max_fail: u32,
}

impl Default for PytestConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string()],
            max_fail: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root; `/chat/completions` is appended.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub generator: ModelSettings,
    pub critic: ModelSettings,
    pub reporter: ModelSettings,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            request_timeout_secs: 120,
            generator: ModelSettings::new("openai/gpt-oss-20b", 0.2),
            critic: ModelSettings::new("meta-llama/llama-4-maverick-17b-128e-instruct", 0.1),
            reporter: ModelSettings::new("qwen/qwen3-32b", 0.3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
}

impl ModelSettings {
    pub fn new(model: &str, temperature: f32) -> Self {
        Self {
            model: model.to_string(),
            temperature,
        }
    }

    fn validate(&self, role: &str) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(anyhow!("llm.{role}.model must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("llm.{role}.temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_functions: 20,
            name_precedence: NamePrecedence::SourceFirst,
            execution_timeout_secs: 60,
            output_limit_bytes: 200_000,
            context_char_budget: 2_500,
            stall_detection: false,
            artifacts_dir: PathBuf::from(".testloop"),
            keep_imports: [
                "math",
                "re",
                "json",
                "typing",
                "dataclasses",
                "datetime",
                "collections",
                "functools",
                "itertools",
                "os",
                "sys",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            pytest: PytestConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_functions == 0 {
            return Err(anyhow!("max_functions must be > 0"));
        }
        if self.execution_timeout_secs == 0 {
            return Err(anyhow!("execution_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.context_char_budget == 0 {
            return Err(anyhow!("context_char_budget must be > 0"));
        }
        if self.artifacts_dir.as_os_str().is_empty() {
            return Err(anyhow!("artifacts_dir must be non-empty"));
        }
        if self.pytest.command.is_empty() || self.pytest.command[0].trim().is_empty() {
            return Err(anyhow!("pytest.command must be a non-empty array"));
        }
        if self.pytest.max_fail == 0 {
            return Err(anyhow!("pytest.max_fail must be > 0"));
        }
        if self.llm.base_url.trim().is_empty() {
            return Err(anyhow!("llm.base_url must be non-empty"));
        }
        if self.llm.api_key_env.trim().is_empty() {
            return Err(anyhow!("llm.api_key_env must be non-empty"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        self.llm.generator.validate("generator")?;
        self.llm.critic.validate("critic")?;
        self.llm.reporter.validate("reporter")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
