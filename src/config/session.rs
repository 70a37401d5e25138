use crate::config::helper::{parse_duration, parse_duration_or};
use crate::config::upload::DEFAULT_UPLOAD_TIMEOUT;
use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessMode {
    /// Child attached to a pseudo-terminal
    #[default]
    Pty,
    /// Child with plain stdin/stdout/stderr pipes
    Pipe,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutPolicy {
    #[default]
    Warn,
    Abort,
}

// YAML structure for the `session:` section
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub mode: ProcessMode,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default)]
    pub grace_period: Option<String>,
    #[serde(default)]
    pub key_delay: Option<String>,
    #[serde(default = "default_history_lines")]
    pub history_lines: usize,
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    #[serde(default = "default_true")]
    pub strip_ansi: bool,
    #[serde(default = "default_true")]
    pub echo: bool,
    #[serde(default)]
    pub prompt_timeout: Option<String>,
    #[serde(default)]
    pub on_timeout: TimeoutPolicy,
}

fn default_cols() -> u16 {
    120
}

fn default_rows() -> u16 {
    40
}

fn default_history_lines() -> usize {
    50
}

fn default_context_lines() -> usize {
    5
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_true() -> bool {
    true
}

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);
const DEFAULT_KEY_DELAY: Duration = Duration::from_millis(200);

/// Everything needed to start the child process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub mode: ProcessMode,
    pub cols: u16,
    pub rows: u16,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            mode: ProcessMode::default(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn mode(mut self, mode: ProcessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Command line as shown in logs.
    pub fn display(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Tunables of the read/match/act loop.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub grace_period: Duration,
    pub key_delay: Duration,
    /// Lines remembered before the latest one
    pub history_lines: usize,
    /// Preceding lines sent along with a matched line on upload
    pub context_lines: usize,
    pub max_line_bytes: usize,
    pub strip_ansi: bool,
    pub echo: bool,
    pub prompt_timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
    pub upload_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            key_delay: DEFAULT_KEY_DELAY,
            history_lines: default_history_lines(),
            context_lines: default_context_lines(),
            max_line_bytes: default_max_line_bytes(),
            strip_ansi: true,
            echo: true,
            prompt_timeout: None,
            on_timeout: TimeoutPolicy::default(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Validate the section and split it into launch and loop settings.
    pub fn compile(&self, upload_timeout: Duration) -> Result<(LaunchSpec, EngineSettings)> {
        if self.command.trim().is_empty() {
            return Err(anyhow!("session.command must not be empty"));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(anyhow!("session.cols and session.rows must be positive"));
        }
        if self.max_line_bytes == 0 {
            return Err(anyhow!("session.max_line_bytes must be positive"));
        }
        if self.context_lines > self.history_lines {
            return Err(anyhow!(
                "session.context_lines ({}) cannot exceed session.history_lines ({})",
                self.context_lines,
                self.history_lines
            ));
        }

        let prompt_timeout = match &self.prompt_timeout {
            Some(s) => Some(parse_duration(s)?),
            None => None,
        };

        let launch = LaunchSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            mode: self.mode,
            cols: self.cols,
            rows: self.rows,
        };

        let settings = EngineSettings {
            grace_period: parse_duration_or(&self.grace_period, DEFAULT_GRACE_PERIOD)?,
            key_delay: parse_duration_or(&self.key_delay, DEFAULT_KEY_DELAY)?,
            history_lines: self.history_lines,
            context_lines: self.context_lines,
            max_line_bytes: self.max_line_bytes,
            strip_ansi: self.strip_ansi,
            echo: self.echo,
            prompt_timeout,
            on_timeout: self.on_timeout,
            upload_timeout,
        };

        Ok((launch, settings))
    }
}
