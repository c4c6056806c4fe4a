//! The two watch modes differ only in how the newest item is found and
//! where its payload lives.

use super::state::Identity;
use crate::config::SourceSpec;
use crate::error::{Result, WatchError};
use crate::source::{cell_as_string, RemoteSource, StorageObject};

/// Newest item of a collection and the URL of its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestItem {
    pub identity: Identity,
    pub url: String,
}

/// Newest object by `created_at`. Among equal timestamps the one listed
/// first wins, so the result does not depend on sort stability.
pub fn pick_latest(files: &[StorageObject]) -> Option<&StorageObject> {
    files.iter().fold(None, |best, file| match best {
        Some(current) if current.created_at >= file.created_at => Some(current),
        _ => Some(file),
    })
}

pub async fn latest_item(source: &dyn RemoteSource, spec: &SourceSpec) -> Result<Option<LatestItem>> {
    match spec {
        SourceSpec::Bucket { bucket } => {
            let files = source.list_files(bucket).await?;
            Ok(pick_latest(&files).map(|file| LatestItem {
                identity: Identity::Object {
                    name: file.name.clone(),
                    created_at: file.created_at,
                },
                url: source.download_url(bucket, &file.name),
            }))
        }
        SourceSpec::Table {
            table,
            order_column,
            id_column,
            url_column,
        } => {
            let Some(row) = source
                .query_latest_row(table, order_column, &[id_column.as_str(), url_column.as_str()])
                .await?
            else {
                return Ok(None);
            };

            let key = cell_as_string(&row, id_column).ok_or_else(|| {
                WatchError::backend(None, format!("latest row of {} has no {}", table, id_column))
            })?;
            let url = cell_as_string(&row, url_column).ok_or_else(|| {
                WatchError::backend(
                    None,
                    format!("row {} of {} has no {}", key, table, url_column),
                )
            })?;

            Ok(Some(LatestItem {
                identity: Identity::Row { key },
                url,
            }))
        }
    }
}
