//! Supabase REST implementation of the remote source and sink.
//!
//! Storage: `/storage/v1/object/...`, tables: `/rest/v1/{table}` (PostgREST).

use super::{RemoteSink, RemoteSource, Row, StorageObject};
use crate::config::{BackendConfig, KeyRole};
use crate::error::{Result, WatchError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

/// Maximum number of objects requested per bucket listing
pub const LIST_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct SupabaseSource {
    client: Client,
    base_url: String,
    key: String,
    key_role: KeyRole,
}

/// Listing entry; folders come back without timestamps
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl SupabaseSource {
    pub fn new(backend: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(backend.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: backend.base_url().to_string(),
            key: backend.key.clone(),
            key_role: backend.key_role,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    fn list_url(&self, bucket: &str) -> String {
        format!(
            "{}/storage/v1/object/list/{}",
            self.base_url,
            encode_segment(bucket)
        )
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            encode_segment(bucket),
            encode_path(path)
        )
    }

    fn authenticated_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/authenticated/{}/{}",
            self.base_url,
            encode_segment(bucket),
            encode_path(path)
        )
    }

    /// Service-role keys may read private objects, so downloads from the
    /// project itself carry them
    fn sends_key_to(&self, url: &str) -> bool {
        self.key_role == KeyRole::ServiceRole
            && url
                .strip_prefix(self.base_url.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn latest_row_url(&self, table: &str, order_column: &str, select_columns: &[&str]) -> String {
        format!(
            "{}/rest/v1/{}?select={}&order={}.desc&limit=1",
            self.base_url,
            encode_segment(table),
            encode_columns(select_columns),
            urlencoding::encode(order_column)
        )
    }

    fn row_eq_url(&self, table: &str, column: &str, value: &str, select_columns: &[&str]) -> String {
        format!(
            "{}/rest/v1/{}?select={}&{}=eq.{}&limit=1",
            self.base_url,
            encode_segment(table),
            encode_columns(select_columns),
            urlencoding::encode(column),
            urlencoding::encode(value)
        )
    }

    fn update_url(&self, table: &str, column: &str, value: &str) -> String {
        format!(
            "{}/rest/v1/{}?{}=eq.{}",
            self.base_url,
            encode_segment(table),
            urlencoding::encode(column),
            urlencoding::encode(value)
        )
    }

    async fn first_row(&self, url: &str, what: &str) -> Result<Option<Row>> {
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| WatchError::backend(None, format!("Failed to query {}: {}", what, e)))?;

        let response = check_status(response, what).await?;
        let rows: Vec<Row> = response.json().await.map_err(|e| {
            WatchError::backend(None, format!("Failed to parse {} response: {}", what, e))
        })?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl RemoteSource for SupabaseSource {
    async fn list_files(&self, bucket: &str) -> Result<Vec<StorageObject>> {
        let body = json!({
            "prefix": "",
            "limit": LIST_LIMIT,
            "offset": 0,
            "sortBy": { "column": "created_at", "order": "desc" },
        });

        let response = self
            .authorized(self.client.post(self.list_url(bucket)))
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::backend(None, format!("Failed to list bucket {}: {}", bucket, e)))?;

        let response = check_status(response, "bucket listing").await?;
        let entries: Vec<ListEntry> = response.json().await.map_err(|e| {
            WatchError::backend(None, format!("Failed to parse bucket listing: {}", e))
        })?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                entry
                    .created_at
                    .map(|created_at| StorageObject::new(entry.name, created_at))
            })
            .collect())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            encode_segment(bucket),
            encode_path(name)
        )
    }

    async fn query_latest_row(
        &self,
        table: &str,
        order_column: &str,
        select_columns: &[&str],
    ) -> Result<Option<Row>> {
        let url = self.latest_row_url(table, order_column, select_columns);
        self.first_row(&url, &format!("table {}", table)).await
    }

    async fn query_row_eq(
        &self,
        table: &str,
        column: &str,
        value: &str,
        select_columns: &[&str],
    ) -> Result<Option<Row>> {
        let url = self.row_eq_url(table, column, value, select_columns);
        self.first_row(&url, &format!("table {}", table)).await
    }

    fn download_url(&self, bucket: &str, name: &str) -> String {
        match self.key_role {
            KeyRole::ServiceRole => self.authenticated_url(bucket, name),
            KeyRole::Anon => RemoteSource::public_url(self, bucket, name),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if self.sends_key_to(url) {
            request = self.authorized(request);
        }
        let response = request
            .send()
            .await
            .map_err(|e| WatchError::backend(None, format!("Failed to fetch {}: {}", url, e)))?;

        let response = check_status(response, "payload download").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| WatchError::backend(None, format!("Failed to read payload body: {}", e)))?;

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RemoteSink for SupabaseSource {
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let response = self
            .authorized(self.client.post(self.object_url(bucket, path)))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| WatchError::backend(None, format!("Failed to upload {}: {}", path, e)))?;

        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(WatchError::backend(
                Some(status),
                format!("Upload failed: {}", error_text),
            ));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        RemoteSource::public_url(self, bucket, name)
    }

    async fn update_rows(
        &self,
        table: &str,
        match_column: &str,
        match_value: &str,
        values: Row,
    ) -> Result<()> {
        let response = self
            .authorized(self.client.patch(self.update_url(table, match_column, match_value)))
            .header("Prefer", "return=minimal")
            .json(&values)
            .send()
            .await
            .map_err(|e| WatchError::backend(None, format!("Failed to update {}: {}", table, e)))?;

        check_status(response, &format!("update of {}", table)).await?;
        Ok(())
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(WatchError::backend(
        Some(status.as_u16()),
        format!("{} failed with status {}: {}", what, status, error_text),
    ))
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Encode each path segment but keep the separators
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_columns(columns: &[&str]) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    columns
        .iter()
        .map(|c| urlencoding::encode(c).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}
