use super::{
    EXIT_POLL_INTERVAL, ExitInfo, OUTPUT_CHANNEL_CAPACITY, OutputChunk, ProcessSupervisor,
    READ_BUF_SIZE, send_sigterm,
};
use crate::config::LaunchSpec;
use crate::error::SupervisorError;
use bytes::Bytes;
use portable_pty::{
    Child, ChildKiller, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem,
};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Child process attached to a pseudo-terminal.
///
/// Output is read on a dedicated thread (the pty reader is blocking) and
/// forwarded over a bounded channel. Writes go through `spawn_blocking`.
pub struct PtyProcess {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    output_rx: Option<mpsc::Receiver<OutputChunk>>,
    exit: Option<ExitInfo>,
    /// Last signal this supervisor sent to the child
    sent_signal: Option<i32>,
}

impl PtyProcess {
    pub fn spawn(program: &Path, spec: &LaunchSpec) -> Result<Self, SupervisorError> {
        info!(
            "Creating pty {}x{} for {}",
            spec.cols,
            spec.rows,
            spec.display()
        );

        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SupervisorError::StartupFailure(format!("Failed to create PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(&spec.args);
        if !spec.env.contains_key("TERM") {
            cmd.env("TERM", "xterm-256color");
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        match &spec.cwd {
            Some(dir) => cmd.cwd(dir),
            None => {
                if let Ok(current_dir) = std::env::current_dir() {
                    cmd.cwd(current_dir);
                }
            }
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            SupervisorError::StartupFailure(format!("Failed to spawn {}: {e}", spec.command))
        })?;

        // The child holds its own handle; ours would keep the pty open after exit
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SupervisorError::StartupFailure(format!("Failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SupervisorError::StartupFailure(format!("Failed to take writer: {e}")))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || read_loop(reader, output_tx))?;

        info!("✅ Process spawned (pid {:?})", child.process_id());

        Ok(Self {
            _master: pair.master,
            child,
            writer: Arc::new(Mutex::new(writer)),
            output_rx: Some(output_rx),
            exit: None,
            sent_signal: None,
        })
    }

    fn poll_exit(&mut self) -> Option<ExitInfo> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    let info = exit_info(&status, self.sent_signal);
                    debug!("Process exited: {:?}", info);
                    self.exit = Some(info);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to poll process status: {}", e);
                }
            }
        }
        self.exit
    }

    async fn wait_until(&mut self, grace: Duration) -> Option<ExitInfo> {
        let started = Instant::now();
        loop {
            if let Some(info) = self.poll_exit() {
                return Some(info);
            }
            if started.elapsed() >= grace {
                return None;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

const SIGTERM: i32 = 15;
const SIGKILL: i32 = 9;

/// portable-pty reports a signal death only through its `Display` text
/// ("Terminated by Killed", "Terminated by Signal 37"), so the number is
/// recovered from the description, falling back to the signal we sent.
fn exit_info(status: &portable_pty::ExitStatus, sent_signal: Option<i32>) -> ExitInfo {
    let text = status.to_string();
    match text.strip_prefix("Terminated by ") {
        Some(name) if !status.success() => ExitInfo {
            code: None,
            signal: signal_number(name).or(sent_signal),
        },
        _ => ExitInfo::code(status.exit_code() as i32),
    }
}

#[cfg(unix)]
fn signal_number(description: &str) -> Option<i32> {
    use nix::sys::signal::Signal;

    if let Some(number) = description.strip_prefix("Signal ") {
        return number.trim().parse().ok();
    }
    let signal = match description {
        "Hangup" => Signal::SIGHUP,
        "Interrupt" => Signal::SIGINT,
        "Quit" => Signal::SIGQUIT,
        "Illegal instruction" => Signal::SIGILL,
        "Trace/breakpoint trap" => Signal::SIGTRAP,
        "Aborted" | "Abort trap" => Signal::SIGABRT,
        "Bus error" => Signal::SIGBUS,
        "Floating point exception" => Signal::SIGFPE,
        "Killed" => Signal::SIGKILL,
        "User defined signal 1" => Signal::SIGUSR1,
        "Segmentation fault" => Signal::SIGSEGV,
        "User defined signal 2" => Signal::SIGUSR2,
        "Broken pipe" => Signal::SIGPIPE,
        "Alarm clock" => Signal::SIGALRM,
        "Terminated" => Signal::SIGTERM,
        _ => return None,
    };
    Some(signal as i32)
}

#[cfg(not(unix))]
fn signal_number(description: &str) -> Option<i32> {
    description.strip_prefix("Signal ")?.trim().parse().ok()
}

fn read_loop(mut reader: Box<dyn Read + Send>, output_tx: mpsc::Sender<OutputChunk>) {
    let mut buf = [0u8; READ_BUF_SIZE];
    debug!("PTY reader started");

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if output_tx
                    .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                    .is_err()
                {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) if is_pty_closed(&e) => break,
            Err(e) => {
                error!("❌ Error reading from PTY: {}", e);
                let _ = output_tx.blocking_send(Err(e));
                break;
            }
        }
    }
    debug!("PTY reader terminating");
}

/// Linux reports EIO on the master once every slave handle is closed.
#[cfg(unix)]
fn is_pty_closed(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_pty_closed(_e: &std::io::Error) -> bool {
    false
}

#[async_trait::async_trait]
impl ProcessSupervisor for PtyProcess {
    fn take_output(&mut self) -> Option<mpsc::Receiver<OutputChunk>> {
        self.output_rx.take()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SupervisorError> {
        if self.poll_exit().is_some() {
            return Err(SupervisorError::Closed);
        }

        let writer = Arc::clone(&self.writer);
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|_| std::io::Error::other("pty writer lock poisoned"))?;
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(std::io::Error::other)?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => SupervisorError::Closed,
            _ => SupervisorError::IoError(e),
        })
    }

    fn is_alive(&mut self) -> bool {
        self.poll_exit().is_none()
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), SupervisorError> {
        if self.poll_exit().is_some() {
            return Ok(());
        }

        if let Some(pid) = self.child.process_id() {
            info!("🛑 Sending SIGTERM to {}", pid);
            send_sigterm(pid)?;
            self.sent_signal = Some(SIGTERM);
        }

        if self.wait_until(grace).await.is_some() {
            return Ok(());
        }

        warn!("Process ignored SIGTERM for {:?}, killing", grace);
        self.sent_signal = Some(SIGKILL);
        if let Err(e) = self.child.kill() {
            // Lost the race with a natural exit
            if self.poll_exit().is_none() {
                return Err(e.into());
            }
        }
        self.wait_until(grace).await;
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitInfo, SupervisorError> {
        loop {
            if let Some(info) = self.poll_exit() {
                return Ok(info);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.poll_exit().is_none() {
            info!("🔄 Killing child process on drop");
            if let Err(e) = self.child.kill() {
                error!("Failed to kill child process: {}", e);
            }
            if let Err(e) = self.child.wait() {
                error!("Failed to wait for child process: {}", e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    async fn collect_output(rx: &mut mpsc::Receiver<OutputChunk>) -> String {
        let mut out = Vec::new();
        while let Ok(Some(chunk)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            match chunk {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn test_pty_echo_and_exit_code() {
        let spec = LaunchSpec::new("sh").arg("-c").arg("echo pty-ready; exit 3");
        let program = which::which("sh").unwrap();
        let mut process = match PtyProcess::spawn(&program, &spec) {
            Ok(process) => process,
            Err(e) => {
                // No pty devices in this environment
                eprintln!("skipping: {e}");
                return;
            }
        };

        let mut rx = process.take_output().unwrap();
        assert!(process.take_output().is_none());

        let output = collect_output(&mut rx).await;
        assert!(output.contains("pty-ready"), "output was {output:?}");

        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!process.is_alive());
        assert!(matches!(
            process.write(b"late\r").await,
            Err(SupervisorError::Closed)
        ));
    }

    #[test]
    fn test_exit_info_recovers_signal() {
        use portable_pty::ExitStatus;

        assert_eq!(exit_info(&ExitStatus::with_exit_code(3), None), ExitInfo::code(3));
        assert_eq!(exit_info(&ExitStatus::with_exit_code(0), Some(SIGTERM)), ExitInfo::code(0));

        let killed = exit_info(&ExitStatus::with_signal("Killed"), None);
        assert_eq!(killed.code, None);
        assert_eq!(killed.signal, Some(9));
        assert_eq!(exit_info(&ExitStatus::with_signal("Terminated"), None).signal, Some(15));
        assert_eq!(exit_info(&ExitStatus::with_signal("Signal 37"), None).signal, Some(37));

        let unknown = exit_info(&ExitStatus::with_signal("Mystery"), Some(SIGTERM));
        assert_eq!(unknown.signal, Some(SIGTERM));
    }

    #[tokio::test]
    async fn test_pty_signal_death_is_reported() {
        let spec = LaunchSpec::new("sh").arg("-c").arg("kill -9 $$");
        let program = which::which("sh").unwrap();
        let mut process = match PtyProcess::spawn(&program, &spec) {
            Ok(process) => process,
            Err(e) => {
                eprintln!("skipping: {e}");
                return;
            }
        };
        let mut rx = process.take_output().unwrap();
        collect_output(&mut rx).await;

        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.signal, Some(9));
        assert!(!exit.success());
    }
}
