//! Upload generated output to a bucket and optionally link it from a row.
//!
//! Output nodes must not fail the graph, so errors end up in
//! [`UploadReport::message`] instead of being returned.

use crate::error::{Result, WatchError};
use crate::logging::{log_error, log_info, log_warn};
use crate::payload::{encode_png, encode_wav, AudioClip, ImageTensor};
use crate::source::{RemoteSink, Row};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const LOG_TAG: &str = "uploader";

/// Row to update with the public URL of the uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowLink {
    pub table: String,
    #[serde(rename = "idColumn")]
    pub id_column: String,
    pub id: String,
    #[serde(rename = "urlColumn")]
    pub url_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub bucket: String,
    #[serde(rename = "baseFileName")]
    pub base_file_name: String,
    #[serde(rename = "rowLink", default)]
    pub row_link: Option<RowLink>,
}

impl UploadRequest {
    pub fn new(bucket: impl Into<String>, base_file_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            base_file_name: base_file_name.into(),
            row_link: None,
        }
    }

    pub fn with_row_link(mut self, link: RowLink) -> Self {
        self.row_link = Some(link);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub success: bool,
    pub message: String,
    pub filename: String,
    pub public_url: Option<String>,
}

struct Encoded {
    bytes: Vec<u8>,
    extension: &'static str,
    content_type: &'static str,
}

pub struct Uploader {
    sink: Arc<dyn RemoteSink>,
}

impl Uploader {
    pub fn new(sink: Arc<dyn RemoteSink>) -> Self {
        Self { sink }
    }

    pub async fn upload_image(&self, image: &ImageTensor, request: &UploadRequest) -> UploadReport {
        let encoded = encode_png(image).map(|bytes| Encoded {
            bytes,
            extension: "png",
            content_type: "image/png",
        });
        self.upload(encoded, request, Local::now()).await
    }

    pub async fn upload_audio(&self, audio: &AudioClip, request: &UploadRequest) -> UploadReport {
        let encoded = encode_wav(audio).map(|bytes| Encoded {
            bytes,
            extension: "wav",
            content_type: "audio/wav",
        });
        self.upload(encoded, request, Local::now()).await
    }

    async fn upload(
        &self,
        encoded: Result<Encoded>,
        request: &UploadRequest,
        now: DateTime<Local>,
    ) -> UploadReport {
        let filename = match encoded {
            Ok(ref e) => timestamped_file_name(&request.base_file_name, e.extension, now),
            Err(_) => String::new(),
        };

        match self.try_upload(encoded, request, &filename).await {
            Ok(public_url) => {
                log_info(
                    LOG_TAG,
                    &format!("Uploaded {} to bucket {}", filename, request.bucket),
                );
                UploadReport {
                    success: true,
                    message: "Upload successful".to_string(),
                    filename,
                    public_url: Some(public_url),
                }
            }
            Err(e) => {
                log_error(LOG_TAG, &format!("Upload of {} failed: {}", filename, e));
                UploadReport {
                    success: false,
                    message: e.to_string(),
                    filename,
                    public_url: None,
                }
            }
        }
    }

    async fn try_upload(
        &self,
        encoded: Result<Encoded>,
        request: &UploadRequest,
        filename: &str,
    ) -> Result<String> {
        if request.bucket.trim().is_empty() {
            return Err(WatchError::Config("bucket must not be empty".to_string()));
        }
        let encoded = encoded?;

        self.sink
            .upload_object(&request.bucket, filename, encoded.bytes, encoded.content_type)
            .await?;

        let public_url = self.sink.public_url(&request.bucket, filename);

        // The file is already stored; a failed row update is only logged
        if let Some(link) = &request.row_link {
            if let Err(e) = self.link_row(link, &public_url).await {
                log_warn(
                    LOG_TAG,
                    &format!("Error updating {} for {}={}: {}", link.table, link.id_column, link.id, e),
                );
            }
        }

        Ok(public_url)
    }

    async fn link_row(&self, link: &RowLink, public_url: &str) -> Result<()> {
        if link.id.is_empty() {
            return Ok(());
        }

        let mut values = Row::new();
        values.insert(link.url_column.clone(), Value::String(public_url.to_string()));
        self.sink
            .update_rows(&link.table, &link.id_column, &link.id, values)
            .await?;

        log_info(
            LOG_TAG,
            &format!("Updated {} for {}={}", link.table, link.id_column, link.id),
        );
        Ok(())
    }
}

/// `{base}_{YYYYmmdd_HHMMSS}.{ext}`
pub fn timestamped_file_name(base: &str, extension: &str, now: DateTime<Local>) -> String {
    format!("{}_{}.{}", base, now.format("%Y%m%d_%H%M%S"), extension)
}
