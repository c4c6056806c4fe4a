//! Cursor, cached output and dirty flag, guarded together.
//!
//! The poll loop is the only writer of the cursor and output; the host reads
//! through `peek` and clears the flag through `consume_dirty`. Every write goes
//! through one mutex so a reader never sees an output from one cycle paired
//! with the cursor of another.

use crate::config::PayloadKind;
use crate::error::WatchError;
use crate::payload::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of the newest item in a watched collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Identity {
    /// Storage object: name plus creation time
    Object {
        name: String,
        created_at: DateTime<Utc>,
    },
    /// Table row: value of the id column
    Row { key: String },
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Object { name, created_at } => {
                write!(f, "{} @ {}", name, created_at.to_rfc3339())
            }
            Identity::Row { key } => write!(f, "row {}", key),
        }
    }
}

/// The current output and the cursor it was decoded for. `cursor` is `None`
/// while the payload is still the placeholder.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub cursor: Option<Identity>,
    pub payload: Arc<Payload>,
}

impl Snapshot {
    fn sentinel(kind: PayloadKind) -> Self {
        Self {
            cursor: None,
            payload: Arc::new(Payload::sentinel(kind)),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.cursor.is_none()
    }
}

#[derive(Debug)]
struct WatchState {
    /// Bumped on every session start; writes from older loops are dropped
    generation: u64,
    snapshot: Snapshot,
    dirty: bool,
    polls: u64,
    failures: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_poll_at: Option<DateTime<Utc>>,
}

/// Poll bookkeeping copied out for status reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<WatchState>>,
}

impl SharedState {
    pub fn new(kind: PayloadKind) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WatchState {
                generation: 0,
                snapshot: Snapshot::sentinel(kind),
                dirty: false,
                polls: 0,
                failures: 0,
                consecutive_failures: 0,
                last_error: None,
                last_poll_at: None,
            })),
        }
    }

    // Host-facing accessors must always succeed, so a poisoned lock is
    // recovered rather than reported.
    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new session: placeholder output, no cursor, clean flag.
    /// Returns the generation the new loop must write under.
    pub fn reset(&self, kind: PayloadKind) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.snapshot = Snapshot::sentinel(kind);
        state.dirty = false;
        state.polls = 0;
        state.failures = 0;
        state.consecutive_failures = 0;
        state.last_error = None;
        state.last_poll_at = None;
        state.generation
    }

    /// End the current session. The output stays readable, but late writes
    /// from its loop are dropped.
    pub fn retire(&self) {
        self.lock().generation += 1;
    }

    pub fn peek(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    pub fn cursor(&self) -> Option<Identity> {
        self.lock().snapshot.cursor.clone()
    }

    /// Test-and-clear of the dirty flag
    pub fn consume_dirty(&self) -> bool {
        let mut state = self.lock();
        std::mem::replace(&mut state.dirty, false)
    }

    /// Replace output and cursor together and raise the dirty flag.
    /// Returns false when `generation` belongs to a stopped session.
    pub fn commit(&self, generation: u64, cursor: Identity, payload: Payload) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.snapshot = Snapshot {
            cursor: Some(cursor),
            payload: Arc::new(payload),
        };
        state.dirty = true;
        true
    }

    /// Record the end of one poll cycle
    pub fn record_poll(&self, generation: u64, error: Option<&WatchError>) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.polls += 1;
        state.last_poll_at = Some(Utc::now());
        match error {
            Some(e) => {
                state.failures += 1;
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.last_error = Some(e.to_string());
            }
            None => {
                state.consecutive_failures = 0;
            }
        }
    }

    pub fn stats(&self) -> PollStats {
        let state = self.lock();
        PollStats {
            polls: state.polls,
            failures: state.failures,
            consecutive_failures: state.consecutive_failures,
            last_error: state.last_error.clone(),
            last_poll_at: state.last_poll_at,
        }
    }
}
