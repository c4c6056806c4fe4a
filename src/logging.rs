use crate::config::ensure_logs_dir;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex, Once};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const LOG_FILE_NAME: &str = "supabase-watch.log";

static LOGGER_INITIALIZED: Once = Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Directory for the rolling log file; `None` means `~/.supabase-watch/logs`
    pub log_dir: Option<PathBuf>,
    /// Write a daily rolling file next to console output
    pub file_logging: bool,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_logging: true,
            default_filter: "info".to_string(),
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(settings: LogSettings) -> Result<()> {
    let logs_dir = if settings.file_logging {
        Some(match settings.log_dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                dir
            }
            None => ensure_logs_dir()?,
        })
    } else {
        None
    };

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&settings.default_filter));

        // Console logging - compact format
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(true)
            .with_filter(env_filter.clone());

        let file_layer = logs_dir.map(|dir| {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Store the guard to keep the writer alive
            if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
                *guard_mutex = Some(guard);
            }

            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter)
        });

        // A subscriber installed elsewhere (tests, embedding host) wins
        let _ = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(())
}

// Convenience functions for different log levels, tagged with the watcher label
pub fn log_debug(watcher: &str, message: &str) {
    debug!(watcher = watcher, "{}", message);
}

pub fn log_info(watcher: &str, message: &str) {
    info!(watcher = watcher, "{}", message);
}

pub fn log_warn(watcher: &str, message: &str) {
    warn!(watcher = watcher, "{}", message);
}

pub fn log_error(watcher: &str, message: &str) {
    error!(watcher = watcher, "{}", message);
}
