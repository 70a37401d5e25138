use super::{
    EXIT_POLL_INTERVAL, ExitInfo, OUTPUT_CHANNEL_CAPACITY, OutputChunk, ProcessSupervisor,
};
use crate::error::SupervisorError;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct ScriptState {
    writes: Vec<Vec<u8>>,
    exit: Option<ExitInfo>,
    terminated: bool,
}

/// In-memory stand-in for a child process, used to drive the engine in tests.
///
/// Output is fed through the paired [`ScriptHandle`]; every write the engine
/// makes is recorded for inspection.
pub struct ScriptedProcess {
    state: Arc<Mutex<ScriptState>>,
    output_rx: Option<mpsc::Receiver<OutputChunk>>,
    line_ending: &'static [u8],
    fail_writes: bool,
}

/// Test-side controls of a [`ScriptedProcess`].
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
    output_tx: Arc<Mutex<Option<mpsc::Sender<OutputChunk>>>>,
}

impl ScriptedProcess {
    pub fn new() -> (Self, ScriptHandle) {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(ScriptState::default()));
        let process = Self {
            state: Arc::clone(&state),
            output_rx: Some(output_rx),
            line_ending: b"\r",
            fail_writes: false,
        };
        let handle = ScriptHandle {
            state,
            output_tx: Arc::new(Mutex::new(Some(output_tx))),
        };
        (process, handle)
    }

    /// A process whose whole output is known up front and which exits with
    /// `exit_code` after printing it.
    pub fn from_chunks(chunks: &[&[u8]], exit_code: i32) -> (Self, ScriptHandle) {
        let (output_tx, output_rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk
            let _ = output_tx.try_send(Ok(Bytes::copy_from_slice(chunk)));
        }
        drop(output_tx);

        let state = Arc::new(Mutex::new(ScriptState {
            exit: Some(ExitInfo::code(exit_code)),
            ..ScriptState::default()
        }));
        let process = Self {
            state: Arc::clone(&state),
            output_rx: Some(output_rx),
            line_ending: b"\r",
            fail_writes: false,
        };
        let handle = ScriptHandle {
            state,
            output_tx: Arc::new(Mutex::new(None)),
        };
        (process, handle)
    }

    pub fn with_line_ending(mut self, line_ending: &'static [u8]) -> Self {
        self.line_ending = line_ending;
        self
    }

    /// Every write fails with an I/O error while the process stays alive.
    pub fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ScriptHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sender(&self) -> Option<mpsc::Sender<OutputChunk>> {
        self.output_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Emit output from the child. Ignored once the child has exited.
    pub async fn send(&self, bytes: impl AsRef<[u8]>) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(Ok(Bytes::copy_from_slice(bytes.as_ref()))).await;
        }
    }

    /// Deliver a read error on the output stream.
    pub async fn fail_read(&self, message: &str) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(Err(std::io::Error::other(message.to_string()))).await;
        }
    }

    /// Close the output stream and record the exit status.
    pub fn exit(&self, code: i32) {
        self.output_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let mut state = self.lock();
        if state.exit.is_none() {
            state.exit = Some(ExitInfo::code(code));
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All writes concatenated, lossily decoded.
    pub fn written_text(&self) -> String {
        let bytes: Vec<u8> = self.lock().writes.concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn was_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Wait until at least `count` writes have been recorded.
    pub async fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            let seen = self.lock().writes.len();
            if seen >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.lock().writes.len() >= count
    }
}

#[async_trait::async_trait]
impl ProcessSupervisor for ScriptedProcess {
    fn take_output(&mut self) -> Option<mpsc::Receiver<OutputChunk>> {
        self.output_rx.take()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        if state.exit.is_some() {
            return Err(SupervisorError::Closed);
        }
        if self.fail_writes {
            return Err(SupervisorError::IoError(std::io::Error::other(
                "scripted write failure",
            )));
        }
        state.writes.push(bytes.to_vec());
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.lock().exit.is_none()
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        if state.exit.is_none() {
            state.terminated = true;
            state.exit = Some(ExitInfo {
                code: None,
                signal: Some(15),
            });
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitInfo, SupervisorError> {
        loop {
            let exit = self.lock().exit;
            if let Some(info) = exit {
                return Ok(info);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn line_ending(&self) -> &'static [u8] {
        self.line_ending
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}
