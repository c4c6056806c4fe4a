//! Watch a table or bucket for new content and hand the newest payload to a
//! pull-based host.
//!
//! A [`Watcher`] owns at most one session. Starting a session spawns one
//! background thread running the poll loop on its own single-threaded
//! runtime; the host reads the current output with [`Watcher::peek_output`]
//! and asks whether to re-run with [`Watcher::is_dirty`] (edge-triggered) or
//! [`Watcher::is_changed`] (always true).

pub mod mode;
pub mod poll;
pub mod retry;
pub mod state;
pub mod status;

pub use mode::{pick_latest, LatestItem};
pub use poll::PollOutcome;
pub use retry::RetryPolicy;
pub use state::{Identity, SharedState, Snapshot};
pub use status::WatcherStatus;

use crate::config::{BackendConfig, PayloadKind, WatchTarget};
use crate::error::Result;
use crate::logging::{log_error, log_info, log_warn};
use crate::source::{RemoteSource, SupabaseSource};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session was already running; the new target was ignored
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    /// The loop exited within the join timeout
    Joined,
    /// The loop was still busy (usually inside a backend call) and was left
    /// to finish on its own
    Detached,
}

struct Session {
    target: WatchTarget,
    cancel: CancellationToken,
    handle: thread::JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

/// Builds the remote source for a target's backend settings
pub type Connector = Arc<dyn Fn(&BackendConfig) -> Result<Arc<dyn RemoteSource>> + Send + Sync>;

pub struct Watcher {
    connect: Connector,
    state: SharedState,
    session: Mutex<Option<Session>>,
    interval_override: Option<Duration>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("connect", &"<connector>")
            .field("state", &self.state)
            .field("is_running", &self.is_running())
            .field("interval_override", &self.interval_override)
            .finish()
    }
}

impl Watcher {
    /// Watcher that connects to each target's backend when it starts.
    /// `placeholder` is the payload kind served before the first `start()`.
    pub fn with_connector<F>(placeholder: PayloadKind, connect: F) -> Self
    where
        F: Fn(&BackendConfig) -> Result<Arc<dyn RemoteSource>> + Send + Sync + 'static,
    {
        Self {
            connect: Arc::new(connect),
            state: SharedState::new(placeholder),
            session: Mutex::new(None),
            interval_override: None,
        }
    }

    /// Watcher backed by the Supabase REST API. A client is built from
    /// `target.backend` on every `start()`.
    pub fn supabase(placeholder: PayloadKind) -> Self {
        Self::with_connector(placeholder, |backend| {
            let source: Arc<dyn RemoteSource> = Arc::new(SupabaseSource::new(backend)?);
            Ok(source)
        })
    }

    /// Watcher that polls `source` whatever backend a target names. Target
    /// backend settings are still validated.
    pub fn new(placeholder: PayloadKind, source: Arc<dyn RemoteSource>) -> Self {
        Self::with_connector(placeholder, move |_| Ok(Arc::clone(&source)))
    }

    /// Poll at `interval` instead of the target's `pollIntervalSecs`.
    ///
    /// For hosts that tick faster than the configurable range allows, and
    /// for tests.
    pub fn with_interval_override(mut self, interval: Duration) -> Self {
        self.interval_override = Some(interval);
        self
    }

    /// Start watching `target`.
    ///
    /// Validation failures are returned and nothing is spawned. If a session
    /// is already running this is a no-op: the running session keeps its
    /// target, and changing it requires `stop()` then `start()`.
    pub fn start(&self, target: WatchTarget) -> Result<StartOutcome> {
        let mut session = self.session.lock()?;
        let label = target.label();

        if let Some(existing) = session.as_ref() {
            if existing.target != target {
                log_warn(
                    &existing.target.label(),
                    &format!(
                        "Already running; ignoring new target {} (stop the watcher to change it)",
                        label
                    ),
                );
            }
            return Ok(StartOutcome::AlreadyRunning);
        }

        target.validate()?;
        let source = (self.connect)(&target.backend)?;

        let interval = self.interval_override.unwrap_or_else(|| target.poll_interval());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let generation = self.state.reset(target.payload);
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = mpsc::channel();

        let loop_target = target.clone();
        let state = self.state.clone();
        let loop_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("watch-{}", label))
            .spawn(move || {
                runtime.block_on(poll::run_loop(
                    source,
                    loop_target,
                    state,
                    generation,
                    interval,
                    loop_cancel,
                ));
                let _ = done_tx.send(());
            })?;

        log_info(&label, "Watcher started");

        *session = Some(Session {
            target,
            cancel,
            handle,
            done_rx,
        });
        Ok(StartOutcome::Started)
    }

    /// Ask the loop to exit and wait up to the target's join timeout.
    ///
    /// A loop blocked inside a backend call only notices the request once the
    /// call returns; if that takes longer than the timeout the thread is
    /// detached instead of blocking the caller.
    pub fn stop(&self) -> Result<StopOutcome> {
        let Some(session) = self.session.lock()?.take() else {
            return Ok(StopOutcome::NotRunning);
        };

        let label = session.target.label();
        session.cancel.cancel();
        self.state.retire();

        match session.done_rx.recv_timeout(session.target.join_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if session.handle.join().is_err() {
                    log_error(&label, "Watcher thread panicked");
                }
                Ok(StopOutcome::Joined)
            }
            Err(RecvTimeoutError::Timeout) => {
                log_warn(
                    &label,
                    &format!(
                        "Watcher did not stop within {:?}; detaching",
                        session.target.join_timeout()
                    ),
                );
                Ok(StopOutcome::Detached)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .map(|session| session.is_some())
            .unwrap_or(false)
    }

    /// Current output. Never blocks on I/O; the placeholder until the first
    /// successful fetch.
    pub fn peek_output(&self) -> Snapshot {
        self.state.peek()
    }

    /// Test-and-clear of the dirty flag
    pub fn consume_dirty(&self) -> bool {
        self.state.consume_dirty()
    }

    /// Edge-triggered host hook: true once per change of the output
    pub fn is_dirty(&self) -> bool {
        self.consume_dirty()
    }

    /// Legacy host hook for hosts that re-run the node on every tick
    pub fn is_changed(&self) -> bool {
        true
    }

    pub fn status(&self) -> WatcherStatus {
        let (is_running, source) = match self.session.lock() {
            Ok(session) => (
                session.is_some(),
                session.as_ref().map(|s| s.target.label()),
            ),
            Err(_) => (false, None),
        };
        WatcherStatus::new(is_running, source, self.state.cursor(), self.state.stats())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log_error("watcher", &format!("Failed to stop watcher on drop: {}", e));
        }
    }
}
