//! The read → assemble → match → act loop around one child process.

pub mod outcome;

use crate::config::{EngineSettings, LaunchSpec, TimeoutPolicy};
use crate::error::{ActionError, EngineError};
use crate::ruler::{RuleMatch, RuleSet, SessionState, TimeoutState, decide, execute_rule};
use crate::terminal::ansi::strip_ansi;
use crate::terminal::{
    self, ExitInfo, LineAssembler, LogicalLine, OutputChunk, ProcessSupervisor,
};
use crate::upload::{UploadDispatcher, UploadRecord, Uploader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use outcome::{DrainReason, EngineState, FiredRule, SessionOutcome};

/// How often the child's liveness is checked while its output is quiet.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);
/// Per-read limit when collecting output left behind by an exited child.
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Drives one supervised session with an immutable rule set.
pub struct Engine {
    rules: RuleSet,
    settings: EngineSettings,
    uploader: Arc<dyn Uploader>,
}

impl Engine {
    pub fn new(rules: RuleSet, settings: EngineSettings, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            rules,
            settings,
            uploader,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Launch the child and run the session until it ends.
    ///
    /// Only configuration and launch failures return `Err`; everything that
    /// goes wrong after launch is recorded in the outcome.
    pub async fn run(
        &self,
        launch: &LaunchSpec,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, EngineError> {
        self.validate()?;
        let mut supervisor = terminal::spawn(launch)?;
        self.session(supervisor.as_mut(), cancel).await
    }

    /// Run the session against an already started supervisor.
    pub async fn drive<S>(
        &self,
        supervisor: &mut S,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, EngineError>
    where
        S: ProcessSupervisor + ?Sized,
    {
        self.validate()?;
        self.session(supervisor, cancel).await
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.rules.is_empty() {
            return Err(EngineError::Config(anyhow::anyhow!(
                "rule set is empty; nothing to respond to"
            )));
        }
        Ok(())
    }

    async fn session<S>(
        &self,
        supervisor: &mut S,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, EngineError>
    where
        S: ProcessSupervisor + ?Sized,
    {
        let output = supervisor.take_output().ok_or_else(|| {
            EngineError::Io(std::io::Error::other("child output stream already taken"))
        })?;

        let mut session = Session::new(self, cancel);
        Ok(session.run(supervisor, output).await)
    }
}

/// Mutable state of one running session.
struct Session<'e> {
    engine: &'e Engine,
    phase: EngineState,
    state: SessionState,
    assembler: LineAssembler,
    timeouts: TimeoutState,
    uploads: UploadDispatcher,
    upload_records: Vec<UploadRecord>,
    errors: Vec<String>,
    last_line_at: Instant,
    prompt_timeout_reported: bool,
    cancel: CancellationToken,
}

impl<'e> Session<'e> {
    fn new(engine: &'e Engine, cancel: CancellationToken) -> Self {
        let settings = &engine.settings;
        Self {
            engine,
            phase: EngineState::Starting,
            state: SessionState::new(settings.history_lines),
            assembler: LineAssembler::new(settings.max_line_bytes),
            timeouts: TimeoutState::new(),
            uploads: UploadDispatcher::new(Arc::clone(&engine.uploader), settings.upload_timeout),
            upload_records: Vec::new(),
            errors: Vec::new(),
            last_line_at: Instant::now(),
            prompt_timeout_reported: false,
            cancel,
        }
    }

    fn enter(&mut self, phase: EngineState) {
        debug!("Engine {} → {}", self.phase, phase);
        self.phase = phase;
    }

    fn record_error(&mut self, err: impl Into<EngineError>) {
        let err = err.into();
        warn!("⚠️  {}", err);
        self.errors.push(err.to_string());
    }

    /// Record why a rule's actions stopped and pick the matching drain reason.
    fn action_failed(&mut self, err: ActionError) -> DrainReason {
        match err {
            ActionError::Cancelled => {
                info!("🛑 Session cancelled while running rule actions");
                DrainReason::Cancelled
            }
            ActionError::Write(e) => {
                self.record_error(e);
                DrainReason::WriteError
            }
        }
    }

    fn record_upload(&mut self, record: UploadRecord) {
        match &record.error {
            None => info!("✅ Uploaded '{}' ({} bytes)", record.label, record.bytes),
            Some(e) => {
                warn!("Upload of '{}' failed: {}", record.label, e);
                self.errors.push(format!("upload failed: {e}"));
            }
        }
        self.upload_records.push(record);
    }

    async fn run<S>(
        &mut self,
        supervisor: &mut S,
        mut output: mpsc::Receiver<OutputChunk>,
    ) -> SessionOutcome
    where
        S: ProcessSupervisor + ?Sized,
    {
        let engine = self.engine;
        let cancel = self.cancel.clone();
        self.enter(EngineState::Running);
        info!("👀 Watching output with {} rule(s)", engine.rules.len());

        let mut liveness =
            tokio::time::interval_at(Instant::now() + LIVENESS_INTERVAL, LIVENESS_INTERVAL);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let reason = 'session: loop {
            let silence_deadline = self.timeouts.next_deadline(&engine.rules, &self.state);
            let prompt_deadline = self.prompt_deadline();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("🛑 Session cancelled");
                    break 'session DrainReason::Cancelled;
                }

                Some(record) = self.uploads.next_result(), if self.uploads.in_flight() > 0 => {
                    self.record_upload(record);
                }

                chunk = output.recv() => match chunk {
                    Some(Ok(bytes)) => {
                        self.timeouts.reset_activity();
                        for line in self.assembler.feed(&bytes) {
                            if let Err(e) = self.handle_line(line, supervisor).await {
                                break 'session self.action_failed(e);
                            }
                        }
                    }
                    Some(Err(e)) => {
                        self.record_error(e);
                        break 'session DrainReason::ReadError;
                    }
                    None => {
                        debug!("Child output closed");
                        break 'session DrainReason::ChildExited;
                    }
                },

                _ = sleep_until_opt(silence_deadline), if silence_deadline.is_some() => {
                    let due = self.timeouts.due_rules(&engine.rules, &mut self.state, Instant::now());
                    if let Err(e) = self.fire(&due, supervisor).await {
                        break 'session self.action_failed(e);
                    }
                }

                _ = sleep_until_opt(prompt_deadline), if prompt_deadline.is_some() => {
                    let silence = self.engine.settings.prompt_timeout.unwrap_or_default();
                    self.record_error(EngineError::Timeout(silence));
                    self.prompt_timeout_reported = true;
                    if engine.settings.on_timeout == TimeoutPolicy::Abort {
                        break 'session DrainReason::PromptTimeout;
                    }
                }

                _ = liveness.tick() => {
                    if !supervisor.is_alive() {
                        debug!("Child is no longer alive");
                        break 'session DrainReason::ChildExited;
                    }
                }
            }
        };

        self.drain(supervisor, &mut output, reason).await
    }

    fn prompt_deadline(&self) -> Option<Instant> {
        if self.prompt_timeout_reported {
            return None;
        }
        self.engine
            .settings
            .prompt_timeout
            .and_then(|timeout| self.last_line_at.checked_add(timeout))
    }

    async fn handle_line<S>(
        &mut self,
        line: LogicalLine,
        supervisor: &mut S,
    ) -> Result<(), ActionError>
    where
        S: ProcessSupervisor + ?Sized,
    {
        let engine = self.engine;
        let text = if engine.settings.strip_ansi {
            strip_ansi(&line.text).into_owned()
        } else {
            line.text
        };
        if text.trim().is_empty() {
            return Ok(());
        }

        self.last_line_at = Instant::now();
        self.prompt_timeout_reported = false;
        if engine.settings.echo {
            println!("[>] {}", text);
        }
        debug!("Line ({:?}): {:?}", line.ending, text);

        self.state.push_line(&text);
        let matches = decide(&text, &engine.rules, &mut self.state);
        self.fire(&matches, supervisor).await
    }

    async fn fire<S>(
        &mut self,
        matches: &[RuleMatch<'_>],
        supervisor: &mut S,
    ) -> Result<(), ActionError>
    where
        S: ProcessSupervisor + ?Sized,
    {
        let engine = self.engine;
        let settings = &engine.settings;
        for rule_match in matches {
            self.state.record_fire(rule_match.rule.id);
            execute_rule(
                rule_match,
                &self.state,
                supervisor,
                &mut self.uploads,
                settings.key_delay,
                settings.context_lines,
                &self.cancel,
            )
            .await?;
        }
        Ok(())
    }

    async fn drain<S>(
        &mut self,
        supervisor: &mut S,
        output: &mut mpsc::Receiver<OutputChunk>,
        reason: DrainReason,
    ) -> SessionOutcome
    where
        S: ProcessSupervisor + ?Sized,
    {
        self.enter(EngineState::Draining);
        info!("Draining session: {}", reason);

        // Output the child wrote before exiting may still be queued
        if reason == DrainReason::ChildExited {
            while let Ok(Some(chunk)) = tokio::time::timeout(DRAIN_READ_TIMEOUT, output.recv()).await
            {
                let Ok(bytes) = chunk else { break };
                for line in self.assembler.feed(&bytes) {
                    if let Err(e) = self.handle_line(line, supervisor).await {
                        self.action_failed(e);
                    }
                }
            }
        }

        if let Some(line) = self.assembler.finish() {
            debug!("Flushing partial line {:?}", line.text);
            if let Err(e) = self.handle_line(line, supervisor).await {
                self.action_failed(e);
            }
        }

        let exit = self.stop_child(supervisor, reason).await;

        let records = self.uploads.drain(self.engine.settings.upload_timeout).await;
        for record in records {
            self.record_upload(record);
        }
        let uploads_pending = self.uploads.in_flight();
        if uploads_pending > 0 {
            self.errors
                .push(format!("{uploads_pending} upload(s) did not finish in time"));
        }

        self.state.set_alive(false);
        self.enter(EngineState::Terminated);

        let fired = self
            .state
            .fire_counts()
            .iter()
            .map(|(&id, &count)| FiredRule {
                id,
                label: self
                    .engine
                    .rules
                    .get(id)
                    .map(|rule| rule.label.clone())
                    .unwrap_or_default(),
                count,
            })
            .collect();

        let cancelled = reason == DrainReason::Cancelled;
        SessionOutcome {
            state: self.phase,
            reason,
            exit,
            success: !cancelled && exit.is_some_and(|e| e.success()),
            cancelled,
            lines_seen: self.state.lines_seen(),
            fired,
            uploads: std::mem::take(&mut self.upload_records),
            uploads_pending,
            errors: std::mem::take(&mut self.errors),
        }
    }

    /// Make sure the child is gone and collect its exit status.
    async fn stop_child<S>(&mut self, supervisor: &mut S, reason: DrainReason) -> Option<ExitInfo>
    where
        S: ProcessSupervisor + ?Sized,
    {
        let grace = self.engine.settings.grace_period;

        if reason != DrainReason::ChildExited {
            if let Err(e) = supervisor.terminate(grace).await {
                self.record_error(e);
            }
        }

        match tokio::time::timeout(grace, supervisor.wait()).await {
            Ok(Ok(info)) => return Some(info),
            Ok(Err(e)) => {
                self.record_error(e);
                return None;
            }
            Err(_) => {}
        }

        // Output closed but the process lingers
        warn!("Child still running {:?} after its output closed, terminating", grace);
        if let Err(e) = supervisor.terminate(grace).await {
            self.record_error(e);
        }
        match tokio::time::timeout(grace, supervisor.wait()).await {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                self.record_error(e);
                None
            }
            Err(_) => {
                error!("❌ Child did not exit after termination");
                self.errors.push("child did not exit after termination".to_string());
                None
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
