pub mod ansi;
pub mod line_assembler;
pub mod pipe_process;
pub mod pty_process;
pub mod scripted;

use crate::config::{LaunchSpec, ProcessMode};
use crate::error::SupervisorError;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

pub use line_assembler::{LineAssembler, LineEnding, LogicalLine};
pub use pipe_process::PipeProcess;
pub use pty_process::PtyProcess;
pub use scripted::{ScriptHandle, ScriptedProcess};

/// One read from the child's combined output stream.
pub type OutputChunk = std::io::Result<Bytes>;

/// Capacity of the channel between a reader and the engine.
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 256;
pub(crate) const READ_BUF_SIZE: usize = 4096;
/// How often exit status is polled while waiting.
pub(crate) const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Supervised child process: output stream, input channel and lifecycle.
///
/// Implementations must release the child (kill and reap) when dropped.
#[async_trait::async_trait]
pub trait ProcessSupervisor: Send {
    /// Hand the output stream to the caller. Returns `None` once taken.
    /// The channel closes when the child's output reaches EOF.
    fn take_output(&mut self) -> Option<mpsc::Receiver<OutputChunk>>;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SupervisorError>;

    fn is_alive(&mut self) -> bool;

    /// SIGTERM, wait up to `grace`, then kill.
    async fn terminate(&mut self, grace: Duration) -> Result<(), SupervisorError>;

    async fn wait(&mut self) -> Result<ExitInfo, SupervisorError>;

    /// Bytes sent for the Enter key.
    fn line_ending(&self) -> &'static [u8] {
        b"\r"
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Resolve the command and start it in the configured mode.
pub fn spawn(spec: &LaunchSpec) -> Result<Box<dyn ProcessSupervisor>, SupervisorError> {
    let program = which::which(&spec.command).map_err(|e| {
        SupervisorError::StartupFailure(format!("{}: {}", spec.command, e))
    })?;

    tracing::info!(
        "🚀 Launching {} ({:?} mode)",
        program.display(),
        spec.mode
    );

    let supervisor: Box<dyn ProcessSupervisor> = match spec.mode {
        ProcessMode::Pty => Box::new(PtyProcess::spawn(&program, spec)?),
        ProcessMode::Pipe => Box::new(PipeProcess::spawn(&program, spec)?),
    };
    Ok(supervisor)
}

/// Send SIGTERM to `pid`. A process that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn send_sigterm(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from_raw_os_error(errno as i32)),
    }
}

#[cfg(not(unix))]
pub(crate) fn send_sigterm(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_unknown_command_is_launch_failure() {
        let spec = LaunchSpec::new("definitely-not-a-real-command-4f1c");
        match spawn(&spec) {
            Err(SupervisorError::StartupFailure(msg)) => {
                assert!(msg.contains("definitely-not-a-real-command-4f1c"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_info_from_status() {
        use std::os::unix::process::ExitStatusExt;
        let info = ExitInfo::from(std::process::ExitStatus::from_raw(0));
        assert!(info.success());
        let info = ExitInfo::from(std::process::ExitStatus::from_raw(9));
        assert_eq!(info.code, None);
        assert_eq!(info.signal, Some(9));
    }
}
