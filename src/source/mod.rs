//! Narrow interfaces over the backend-as-a-service.
//!
//! `RemoteSource` is what a watcher reads from, `RemoteSink` is what the
//! uploader writes to. `SupabaseSource` implements both over the REST API.

pub mod supabase;

pub use supabase::SupabaseSource;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One database row as returned by the REST API
pub type Row = serde_json::Map<String, Value>;

/// An object in a storage bucket listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageObject {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl StorageObject {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created_at,
        }
    }
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// List the objects of a bucket. Order is whatever the backend returns.
    async fn list_files(&self, bucket: &str) -> Result<Vec<StorageObject>>;

    /// Public URL of an object. Built locally, never fails.
    fn public_url(&self, bucket: &str, name: &str) -> String;

    /// URL a watcher downloads a bucket object from. Defaults to the public URL.
    fn download_url(&self, bucket: &str, name: &str) -> String {
        self.public_url(bucket, name)
    }

    /// Newest row of `table` by `order_column` descending, or `None` when empty
    async fn query_latest_row(
        &self,
        table: &str,
        order_column: &str,
        select_columns: &[&str],
    ) -> Result<Option<Row>>;

    /// First row whose `column` equals `value`
    async fn query_row_eq(
        &self,
        table: &str,
        column: &str,
        value: &str,
        select_columns: &[&str],
    ) -> Result<Option<Row>>;

    /// Download a payload. Non-2xx responses are errors.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    fn public_url(&self, bucket: &str, name: &str) -> String;

    /// Set `values` on every row where `match_column` equals `match_value`
    async fn update_rows(
        &self,
        table: &str,
        match_column: &str,
        match_value: &str,
        values: Row,
    ) -> Result<()>;
}

/// Render a row cell as a string identity. Null and missing cells yield `None`.
pub fn cell_as_string(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
