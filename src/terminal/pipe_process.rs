use super::{
    ExitInfo, OUTPUT_CHANNEL_CAPACITY, OutputChunk, ProcessSupervisor, READ_BUF_SIZE, send_sigterm,
};
use crate::config::LaunchSpec;
use crate::error::SupervisorError;
use bytes::Bytes;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Child process with plain pipes. Stdout and stderr share one output stream.
pub struct PipeProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output_rx: Option<mpsc::Receiver<OutputChunk>>,
    exit: Option<ExitInfo>,
}

impl PipeProcess {
    pub fn spawn(program: &Path, spec: &LaunchSpec) -> Result<Self, SupervisorError> {
        let mut cmd = Command::new(program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            SupervisorError::StartupFailure(format!("Failed to spawn {}: {e}", spec.command))
        })?;

        let stdin = child.stdin.take();
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        // The channel closes once both pumps have dropped their sender
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, output_tx.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, output_tx, "stderr"));
        }

        info!("✅ Process spawned (pid {:?})", child.id());

        Ok(Self {
            child,
            stdin,
            output_rx: Some(output_rx),
            exit: None,
        })
    }

    fn poll_exit(&mut self) -> Option<ExitInfo> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    let info = ExitInfo::from(status);
                    debug!("Process exited: {:?}", info);
                    self.exit = Some(info);
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to poll process status: {}", e),
            }
        }
        self.exit
    }
}

async fn pump<R>(mut stream: R, output_tx: mpsc::Sender<OutputChunk>, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if output_tx
                    .send(Ok(Bytes::copy_from_slice(&buf[..n])))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                error!("❌ Error reading child {}: {}", name, e);
                let _ = output_tx.send(Err(e)).await;
                break;
            }
        }
    }
    debug!("{} pump terminating", name);
}

#[async_trait::async_trait]
impl ProcessSupervisor for PipeProcess {
    fn take_output(&mut self) -> Option<mpsc::Receiver<OutputChunk>> {
        self.output_rx.take()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SupervisorError> {
        let stdin = self.stdin.as_mut().ok_or(SupervisorError::Closed)?;
        let result = match stdin.write_all(bytes).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => {
                self.stdin = None;
                SupervisorError::Closed
            }
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
        // Closing stdin lets well-behaved filters finish on their own
        self.stdin = None;

        if let Some(pid) = self.child.id() {
            info!("🛑 Sending SIGTERM to {}", pid);
            send_sigterm(pid)?;
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                self.exit = Some(ExitInfo::from(status?));
                Ok(())
            }
            Err(_) => {
                warn!("Process ignored SIGTERM for {:?}, killing", grace);
                self.child.kill().await?;
                self.poll_exit();
                Ok(())
            }
        }
    }

    async fn wait(&mut self) -> Result<ExitInfo, SupervisorError> {
        if let Some(info) = self.exit {
            return Ok(info);
        }
        let info = ExitInfo::from(self.child.wait().await?);
        self.exit = Some(info);
        Ok(info)
    }

    fn line_ending(&self) -> &'static [u8] {
        b"\n"
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}
