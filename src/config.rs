use crate::error::{ErrorContext, Result, WatchError};
use crate::watcher::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_POLL_INTERVAL_SECS: u64 = 2;
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_KEY";

/// Which kind of key the backend connection uses.
///
/// Service-role keys bypass row-level security and are needed to poll
/// private tables and buckets from a server process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    Anon,
    #[default]
    ServiceRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub key: String,
    #[serde(rename = "keyRole", default)]
    pub key_role: KeyRole,
    #[serde(rename = "requestTimeoutSecs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "https://your-project.supabase.co".to_string(),
            key: String::new(),
            key_role: KeyRole::ServiceRole,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    /// Endpoint without trailing slash, ready for path concatenation
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(self.url.trim())
            .map_err(|e| WatchError::Config(format!("invalid backend url '{}': {}", self.url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(WatchError::Config(format!(
                "backend url must be http(s), got '{}'",
                parsed.scheme()
            )));
        }
        if self.key.trim().is_empty() {
            return Err(WatchError::Config("backend key is empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(WatchError::Config(
                "request timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

/// The collection a watcher observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SourceSpec {
    /// Newest object in a storage bucket, by creation time
    Bucket { bucket: String },
    /// Newest row of a table, ordered descending by `order_column`
    Table {
        table: String,
        #[serde(rename = "orderColumn", default = "default_order_column")]
        order_column: String,
        #[serde(rename = "idColumn", default = "default_id_column")]
        id_column: String,
        #[serde(rename = "urlColumn", default = "default_url_column")]
        url_column: String,
    },
}

fn default_order_column() -> String {
    "created_at".to_string()
}

fn default_id_column() -> String {
    "unique_id".to_string()
}

fn default_url_column() -> String {
    "image_url".to_string()
}

impl SourceSpec {
    pub fn bucket(bucket: impl Into<String>) -> Self {
        SourceSpec::Bucket {
            bucket: bucket.into(),
        }
    }

    /// Table source with the upstream column defaults
    pub fn table(table: impl Into<String>) -> Self {
        SourceSpec::Table {
            table: table.into(),
            order_column: default_order_column(),
            id_column: default_id_column(),
            url_column: default_url_column(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            SourceSpec::Bucket { bucket } => format!("bucket:{}", bucket),
            SourceSpec::Table { table, .. } => format!("table:{}", table),
        }
    }

    fn validate(&self) -> Result<()> {
        let required: Vec<(&str, &str)> = match self {
            SourceSpec::Bucket { bucket } => vec![("bucket", bucket)],
            SourceSpec::Table {
                table,
                order_column,
                id_column,
                url_column,
            } => vec![
                ("table", table),
                ("orderColumn", order_column),
                ("idColumn", id_column),
                ("urlColumn", url_column),
            ],
        };

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(WatchError::Config(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}

impl Default for SourceSpec {
    fn default() -> Self {
        SourceSpec::table("inputimagetable")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    #[default]
    Image,
    Audio,
}

/// Configuration for one watch session. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub backend: BackendConfig,
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default)]
    pub payload: PayloadKind,
    #[serde(rename = "pollIntervalSecs", default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(rename = "joinTimeoutMs", default = "default_join_timeout")]
    pub join_timeout_ms: u64,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_join_timeout() -> u64 {
    DEFAULT_JOIN_TIMEOUT_MS
}

impl Default for WatchTarget {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            source: SourceSpec::default(),
            payload: PayloadKind::Image,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retry: RetryPolicy::default(),
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
        }
    }
}

impl WatchTarget {
    pub fn new(backend: BackendConfig, source: SourceSpec) -> Self {
        Self {
            backend,
            source,
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: PayloadKind) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Name used in logs and thread names
    pub fn label(&self) -> String {
        self.source.label()
    }

    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.source.validate()?;

        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(WatchError::Config(format!(
                "poll interval must be between {} and {} seconds, got {}",
                MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS, self.poll_interval_secs
            )));
        }
        if self.join_timeout_ms == 0 {
            return Err(WatchError::Config("join timeout must be positive".to_string()));
        }
        self.retry.validate()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Replace url/key with `SUPABASE_URL` / `SUPABASE_KEY` when set
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_SUPABASE_URL).ok(),
            std::env::var(ENV_SUPABASE_KEY).ok(),
        );
    }

    fn apply_overrides(&mut self, url: Option<String>, key: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.backend.url = url;
        }
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.backend.key = key;
        }
    }
}

/// Load a watch target from a `.json` or `.toml` file
pub fn load_watch_target(path: &Path) -> Result<WatchTarget> {
    let content = fs::read_to_string(path).context(&format!("Failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        WatchTarget::from_json_str(&content)
    } else {
        WatchTarget::from_toml_str(&content)
    }
}

pub fn get_data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".supabase-watch"))
        .ok_or_else(|| WatchError::Config("Could not find home directory".to_string()))
}

pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("logs"))
}

pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs_dir = get_logs_dir()?;
    if !logs_dir.exists() {
        fs::create_dir_all(&logs_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = fs::metadata(&logs_dir)?;
            let mut permissions = metadata.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(&logs_dir, permissions)?;
        }
    }
    Ok(logs_dir)
}
