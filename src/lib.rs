// Library exports for the binary and integration tests

pub mod config;
pub mod error;
pub mod logging;
pub mod lookup;
pub mod payload;
pub mod source;
pub mod uploader;
pub mod watcher;

pub use config::{BackendConfig, KeyRole, PayloadKind, SourceSpec, WatchTarget};
pub use error::{Result, WatchError};
pub use lookup::{load_row_payload, LookupRequest};
pub use payload::{AudioClip, ImageTensor, Payload};
pub use source::{RemoteSink, RemoteSource, SupabaseSource};
pub use uploader::{RowLink, UploadReport, UploadRequest, Uploader};
pub use watcher::{
    Identity, RetryPolicy, Snapshot, StartOutcome, StopOutcome, Watcher, WatcherStatus,
};
