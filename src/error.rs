use thiserror::Error;

/// Watcher and uploader errors
#[derive(Debug, Error)]
pub enum WatchError {
    /// Missing or invalid watch target; raised by `start()` only
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query, listing, upload or fetch failure reported by the backend
    #[error("Backend error{}: {message}", status_suffix(.status))]
    Backend {
        status: Option<u16>,
        message: String,
    },

    /// Payload bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Output could not be encoded for upload
    #[error("Encode error: {0}")]
    Encode(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Endpoint URL errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {})", s)).unwrap_or_default()
}

impl WatchError {
    pub fn backend(status: Option<u16>, message: impl Into<String>) -> Self {
        WatchError::Backend {
            status,
            message: message.into(),
        }
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            WatchError::Backend { status, .. } => *status,
            WatchError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for WatchError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        WatchError::LockPoisoned(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T, WatchError>;
}

impl<T, E: Into<WatchError>> ErrorContext<T> for Result<T, E> {
    fn context(self, msg: &str) -> Result<T, WatchError> {
        self.map_err(|e| match e.into() {
            WatchError::Config(s) => WatchError::Config(format!("{}: {}", msg, s)),
            WatchError::Backend { status, message } => WatchError::Backend {
                status,
                message: format!("{}: {}", msg, message),
            },
            WatchError::Decode(s) => WatchError::Decode(format!("{}: {}", msg, s)),
            WatchError::Encode(s) => WatchError::Encode(format!("{}: {}", msg, s)),
            WatchError::LockPoisoned(s) => WatchError::LockPoisoned(format!("{}: {}", msg, s)),
            WatchError::Other(s) => WatchError::Other(format!("{}: {}", msg, s)),
            other => other,
        })
    }
}

pub type Result<T, E = WatchError> = std::result::Result<T, E>;
