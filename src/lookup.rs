//! Load a single row's payload by id, without a watcher.

use crate::config::PayloadKind;
use crate::error::{ErrorContext, Result, WatchError};
use crate::payload::Payload;
use crate::source::{cell_as_string, RemoteSource};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub table: String,
    #[serde(rename = "idColumn", default = "default_id_column")]
    pub id_column: String,
    #[serde(rename = "urlColumn", default = "default_url_column")]
    pub url_column: String,
    pub id: String,
}

fn default_id_column() -> String {
    "unique_id".to_string()
}

fn default_url_column() -> String {
    "image_url".to_string()
}

impl LookupRequest {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: default_id_column(),
            url_column: default_url_column(),
            id: id.into(),
        }
    }

    pub fn with_url_column(mut self, column: impl Into<String>) -> Self {
        self.url_column = column.into();
        self
    }
}

/// Fetch the row whose id column equals `request.id`, download the URL in
/// its url column and decode it. Returns the payload and the row's id.
pub async fn load_row_payload(
    source: &dyn RemoteSource,
    request: &LookupRequest,
    kind: PayloadKind,
) -> Result<(Payload, String)> {
    if request.table.trim().is_empty() {
        return Err(WatchError::Config("table must not be empty".to_string()));
    }

    let columns = [request.id_column.as_str(), request.url_column.as_str()];
    let row = source
        .query_row_eq(&request.table, &request.id_column, &request.id, &columns)
        .await?
        .ok_or_else(|| WatchError::backend(None, "no row found"))?;

    let url = cell_as_string(&row, &request.url_column).ok_or_else(|| {
        WatchError::backend(
            None,
            format!("row {} has no {}", request.id, request.url_column),
        )
    })?;
    let fetched_id = cell_as_string(&row, &request.id_column).unwrap_or_else(|| request.id.clone());

    let bytes = source
        .fetch_bytes(&url)
        .await
        .context(&format!("fetch of row {}", fetched_id))?;
    let payload = Payload::decode(kind, &bytes).context(&format!("row {}", fetched_id))?;

    Ok((payload, fetched_id))
}
