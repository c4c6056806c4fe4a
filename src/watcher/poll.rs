use super::mode::latest_item;
use super::retry::{classify_error, ErrorType};
use super::state::{Identity, SharedState};
use crate::config::WatchTarget;
use crate::error::{ErrorContext, Result};
use crate::logging::{log_debug, log_error, log_info, log_warn};
use crate::payload::Payload;
use crate::source::RemoteSource;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Collection is empty
    Empty,
    /// Newest item matches the cursor; nothing fetched
    Unchanged,
    /// New item fetched, decoded and published
    Advanced(Identity),
}

/// One poll cycle. Output, cursor and flag are only touched after a
/// successful fetch and decode.
pub async fn poll_once(
    source: &dyn RemoteSource,
    target: &WatchTarget,
    state: &SharedState,
    generation: u64,
) -> Result<PollOutcome> {
    let Some(item) = latest_item(source, &target.source).await? else {
        return Ok(PollOutcome::Empty);
    };

    if state.cursor().as_ref() == Some(&item.identity) {
        return Ok(PollOutcome::Unchanged);
    }

    let bytes = source
        .fetch_bytes(&item.url)
        .await
        .context(&format!("fetch of {}", item.identity))?;
    let payload = Payload::decode(target.payload, &bytes).context(&item.identity.to_string())?;

    if !state.commit(generation, item.identity.clone(), payload) {
        // Session was restarted underneath us; the new loop owns the state now
        return Ok(PollOutcome::Unchanged);
    }
    Ok(PollOutcome::Advanced(item.identity))
}

/// Poll until cancelled. Errors are logged and retried after the delay the
/// retry policy gives; the loop never exits on its own.
pub async fn run_loop(
    source: Arc<dyn RemoteSource>,
    target: WatchTarget,
    state: SharedState,
    generation: u64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let label = target.label();
    log_info(
        &label,
        &format!("Watching {} every {:?}", label, interval),
    );

    let mut consecutive_failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match poll_once(source.as_ref(), &target, &state, generation).await {
            Ok(outcome) => {
                consecutive_failures = 0;
                state.record_poll(generation, None);
                match outcome {
                    PollOutcome::Empty => log_debug(&label, "No items yet"),
                    PollOutcome::Unchanged => log_debug(&label, "No new item"),
                    PollOutcome::Advanced(identity) => {
                        log_info(&label, &format!("New item: {}", identity))
                    }
                }
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                state.record_poll(generation, Some(&e));
                let message = format!(
                    "Poll failed ({} in a row), keeping previous output: {}",
                    consecutive_failures, e
                );
                match classify_error(&e) {
                    ErrorType::Client => log_error(&label, &message),
                    ErrorType::Server | ErrorType::Network | ErrorType::Decode => {
                        log_warn(&label, &message)
                    }
                }
            }
        }

        let delay = target.retry.next_delay(interval, consecutive_failures);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }

    log_info(&label, "Watcher stopped");
}
