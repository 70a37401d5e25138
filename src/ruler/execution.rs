use crate::config::helper::resolve_capture_groups;
use crate::config::types::Action;
use crate::error::ActionError;
use crate::ruler::decision::RuleMatch;
use crate::ruler::session::SessionState;
use crate::terminal::ProcessSupervisor;
use crate::upload::UploadDispatcher;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs a matched rule's actions against the child, then schedules its upload.
///
/// Actions run strictly in order with `key_delay` between consecutive writes.
/// The first failed write aborts the remaining actions and is returned.
/// Cancelling `cancel` interrupts any pending wait, delay or write. The
/// upload is scheduled either way, since the captured context is still valid.
/// Returns the number of writes performed.
pub async fn execute_rule<S>(
    rule_match: &RuleMatch<'_>,
    state: &SessionState,
    supervisor: &mut S,
    uploads: &mut UploadDispatcher,
    key_delay: Duration,
    context_lines: usize,
    cancel: &CancellationToken,
) -> Result<usize, ActionError>
where
    S: ProcessSupervisor + ?Sized,
{
    let rule = rule_match.rule;
    info!("🎯 Rule {} ({}) fired", rule.id, rule.label);

    let result = run_actions(rule_match, supervisor, key_delay, cancel).await;
    match &result {
        Err(ActionError::Cancelled) => info!("Rule {} interrupted by cancellation", rule.id),
        Err(e) => warn!("Rule {} aborted after write failure: {}", rule.id, e),
        Ok(_) => {}
    }

    if rule.upload {
        let context = state
            .context_for(&rule_match.line, context_lines)
            .join("\n");
        uploads.schedule(rule.id, &rule.label, context);
    }

    result
}

async fn run_actions<S>(
    rule_match: &RuleMatch<'_>,
    supervisor: &mut S,
    key_delay: Duration,
    cancel: &CancellationToken,
) -> Result<usize, ActionError>
where
    S: ProcessSupervisor + ?Sized,
{
    let mut writes = 0;

    for action in &rule_match.rule.actions {
        let bytes = match action {
            Action::Wait(duration) => {
                debug!("Waiting {:?}", duration);
                until_cancelled(cancel, tokio::time::sleep(*duration)).await?;
                continue;
            }
            Action::SendKey(key) => key.bytes(supervisor.line_ending()),
            Action::SendText(text) => {
                resolve_capture_groups(text, &rule_match.captures).into_bytes()
            }
        };

        if writes > 0 && !key_delay.is_zero() {
            until_cancelled(cancel, tokio::time::sleep(key_delay)).await?;
        }
        debug!("Sending {} ({} bytes)", action, bytes.len());
        until_cancelled(cancel, supervisor.write(&bytes)).await??;
        writes += 1;
    }

    Ok(writes)
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, ActionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
        output = fut => Ok(output),
    }
}
