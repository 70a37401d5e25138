use crate::config::rule::RuleId;
use crate::terminal::ExitInfo;
use crate::upload::UploadRecord;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Starting,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Draining => "draining",
            EngineState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the engine left the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainReason {
    ChildExited,
    ReadError,
    WriteError,
    Cancelled,
    PromptTimeout,
}

impl fmt::Display for DrainReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DrainReason::ChildExited => "child exited",
            DrainReason::ReadError => "output read failed",
            DrainReason::WriteError => "input write failed",
            DrainReason::Cancelled => "cancelled",
            DrainReason::PromptTimeout => "prompt timeout",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredRule {
    pub id: RuleId,
    pub label: String,
    pub count: usize,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub state: EngineState,
    pub reason: DrainReason,
    pub exit: Option<ExitInfo>,
    pub success: bool,
    pub cancelled: bool,
    pub lines_seen: usize,
    pub fired: Vec<FiredRule>,
    pub uploads: Vec<UploadRecord>,
    /// Publishes still running when the upload timeout ran out
    pub uploads_pending: usize,
    pub errors: Vec<String>,
}

impl SessionOutcome {
    pub fn fire_count(&self, id: RuleId) -> usize {
        self.fired
            .iter()
            .find(|rule| rule.id == id)
            .map(|rule| rule.count)
            .unwrap_or(0)
    }

    pub fn total_fires(&self) -> usize {
        self.fired.iter().map(|rule| rule.count).sum()
    }

    pub fn failed_uploads(&self) -> usize {
        self.uploads.iter().filter(|record| !record.ok).count()
    }

    /// Process exit code for the CLI: the child's own code, 128+signal when it
    /// was killed, 130 when the session was cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            return 130;
        }
        match self.exit {
            Some(ExitInfo {
                code: Some(code), ..
            }) => code,
            Some(ExitInfo {
                signal: Some(signal),
                ..
            }) => 128 + signal,
            _ => 1,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session {} ({})", self.state, self.reason)?;
        match self.exit {
            Some(ExitInfo {
                code: Some(code), ..
            }) => writeln!(f, "  exit code: {code}")?,
            Some(ExitInfo {
                signal: Some(signal),
                ..
            }) => writeln!(f, "  killed by signal {signal}")?,
            _ => writeln!(f, "  exit status unknown")?,
        }
        writeln!(f, "  lines seen: {}", self.lines_seen)?;
        for rule in &self.fired {
            writeln!(f, "  rule {} '{}': fired {}x", rule.id, rule.label, rule.count)?;
        }
        if !self.uploads.is_empty() || self.uploads_pending > 0 {
            writeln!(
                f,
                "  uploads: {} ok, {} failed, {} pending",
                self.uploads.len() - self.failed_uploads(),
                self.failed_uploads(),
                self.uploads_pending
            )?;
        }
        for error in &self.errors {
            writeln!(f, "  ⚠️  {error}")?;
        }
        Ok(())
    }
}
