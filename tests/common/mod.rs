#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use supabase_watch::payload::{encode_png, encode_wav};
use supabase_watch::source::{cell_as_string, Row, StorageObject};
use supabase_watch::{
    AudioClip, BackendConfig, ImageTensor, PayloadKind, RemoteSource, Result, SourceSpec,
    WatchError, WatchTarget, Watcher,
};

/// In-memory backend the tests script between polls
#[derive(Default)]
pub struct ScriptedSource {
    files: Mutex<Vec<StorageObject>>,
    rows: Mutex<Vec<Row>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_queries: AtomicBool,
    fetch_delay_ms: AtomicU64,
    pub query_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    query_times: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_file(&self, name: &str, created_secs: i64, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .push(StorageObject::new(name, at(created_secs)));
        self.blobs
            .lock()
            .unwrap()
            .insert(self.public_url("inputs", name), bytes);
    }

    /// Insert a row that becomes the newest one
    pub fn push_row(&self, key: &str, bytes: Vec<u8>) {
        let url = format!("mem://rows/{}", key);
        let mut row = Row::new();
        row.insert("unique_id".into(), key.into());
        row.insert("image_url".into(), url.clone().into());
        self.rows.lock().unwrap().push(row);
        self.blobs.lock().unwrap().insert(url, bytes);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// When each list/query call arrived
    pub fn query_times(&self) -> Vec<Instant> {
        self.query_times.lock().unwrap().clone()
    }

    fn note_query(&self) {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.query_times.lock().unwrap().push(Instant::now());
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            Err(WatchError::backend(Some(503), "Service Unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    async fn list_files(&self, _bucket: &str) -> Result<Vec<StorageObject>> {
        self.note_query();
        self.check_failing()?;
        Ok(self.files.lock().unwrap().clone())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("mem://{}/{}", bucket, name)
    }

    async fn query_latest_row(
        &self,
        _table: &str,
        _order_column: &str,
        _select_columns: &[&str],
    ) -> Result<Option<Row>> {
        self.note_query();
        self.check_failing()?;
        Ok(self.rows.lock().unwrap().last().cloned())
    }

    async fn query_row_eq(
        &self,
        _table: &str,
        column: &str,
        value: &str,
        _select_columns: &[&str],
    ) -> Result<Option<Row>> {
        self.note_query();
        self.check_failing()?;
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| cell_as_string(row, column).as_deref() == Some(value))
            .cloned())
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.blobs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| WatchError::backend(Some(404), format!("Object not found: {}", url)))
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn png(width: usize, height: usize) -> Vec<u8> {
    encode_png(&ImageTensor::blank(width, height)).unwrap()
}

pub fn wav(samples: usize) -> Vec<u8> {
    encode_wav(&AudioClip {
        sample_rate: 22_050,
        channels: vec![vec![0.25; samples]],
    })
    .unwrap()
}

pub fn backend() -> BackendConfig {
    BackendConfig::new("http://localhost:54321", "test-key")
}

pub fn table_target() -> WatchTarget {
    WatchTarget::new(backend(), SourceSpec::table("inputimagetable"))
}

pub fn bucket_target() -> WatchTarget {
    WatchTarget::new(backend(), SourceSpec::bucket("inputs"))
}

pub fn audio_table_target() -> WatchTarget {
    table_target().with_payload(PayloadKind::Audio)
}

pub const FAST_TICK: Duration = Duration::from_millis(40);

pub fn fast_watcher(source: Arc<ScriptedSource>) -> Watcher {
    Watcher::new(PayloadKind::Image, source).with_interval_override(FAST_TICK)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Wait for at least `n` more backend queries than `from`
pub fn wait_for_queries(source: &ScriptedSource, from: usize, n: usize) -> bool {
    wait_until(Duration::from_secs(3), || source.queries() >= from + n)
}
