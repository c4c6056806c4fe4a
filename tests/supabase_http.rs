mod common;

use common::png;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use supabase_watch::{
    load_row_payload, BackendConfig, ImageTensor, KeyRole, LookupRequest, PayloadKind, RemoteSource,
    RowLink, SourceSpec, StopOutcome, SupabaseSource, UploadRequest, Uploader, WatchError,
    WatchTarget, Watcher,
};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::Filter;

const KEY: &str = "service-role-test-key";

type Uploads = Arc<Mutex<Vec<(String, String, String, usize)>>>;
type Patches = Arc<Mutex<Vec<(String, HashMap<String, String>, Value)>>>;

struct FakeBackend {
    base: String,
    uploads: Uploads,
    patches: Patches,
}

impl FakeBackend {
    fn backend(&self) -> BackendConfig {
        BackendConfig::new(self.base.clone(), KEY)
    }

    fn source(&self) -> SupabaseSource {
        SupabaseSource::new(&self.backend()).unwrap()
    }
}

fn stored_object(bucket: &str, name: &str) -> Option<Vec<u8>> {
    match (bucket, name) {
        ("inputs", "old.png") => Some(png(2, 2)),
        ("inputs", "new.png") => Some(png(6, 4)),
        ("private", "secret.png") => Some(png(5, 5)),
        _ => None,
    }
}

fn spawn_backend() -> FakeBackend {
    spawn_backend_with_row("r1")
}

/// Minimal storage + PostgREST surface on an ephemeral port. The table
/// `inputimagetable` holds a single row keyed `row_key`.
fn spawn_backend_with_row(row_key: &str) -> FakeBackend {
    let row_key = row_key.to_string();
    let base: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let uploads: Uploads = Arc::default();
    let patches: Patches = Arc::default();

    let list = warp::post()
        .and(warp::path!("storage" / "v1" / "object" / "list" / String))
        .and(warp::header::<String>("apikey"))
        .and(warp::body::json())
        .map(|bucket: String, key: String, _body: Value| {
            if key != KEY {
                return warp::reply::with_status(
                    warp::reply::json(&json!({"message": "Invalid API key"})),
                    StatusCode::UNAUTHORIZED,
                );
            }
            let entries = match bucket.as_str() {
                "inputs" => json!([
                    {"name": "nested", "id": null, "created_at": null},
                    {"name": "old.png", "created_at": "2025-01-01T00:00:00.000Z"},
                    {"name": "new.png", "created_at": "2025-01-02T08:30:00.000Z"},
                ]),
                "private" => json!([
                    {"name": "secret.png", "created_at": "2025-02-01T00:00:00.000Z"},
                ]),
                _ => json!([]),
            };
            warp::reply::with_status(warp::reply::json(&entries), StatusCode::OK)
        });

    let public = warp::get()
        .and(warp::path!("storage" / "v1" / "object" / "public" / String / String))
        .map(|bucket: String, name: String| {
            if bucket == "private" {
                return warp::reply::with_status(
                    b"Bucket not found".to_vec(),
                    StatusCode::BAD_REQUEST,
                );
            }
            match stored_object(&bucket, &name) {
                Some(bytes) => warp::reply::with_status(bytes, StatusCode::OK),
                None => warp::reply::with_status(b"Object not found".to_vec(), StatusCode::NOT_FOUND),
            }
        });

    let authenticated = warp::get()
        .and(warp::path!("storage" / "v1" / "object" / "authenticated" / String / String))
        .and(warp::header::optional::<String>("apikey"))
        .map(|bucket: String, name: String, key: Option<String>| {
            if key.as_deref() != Some(KEY) {
                return warp::reply::with_status(b"invalid signature".to_vec(), StatusCode::BAD_REQUEST);
            }
            match stored_object(&bucket, &name) {
                Some(bytes) => warp::reply::with_status(bytes, StatusCode::OK),
                None => warp::reply::with_status(b"Object not found".to_vec(), StatusCode::NOT_FOUND),
            }
        });

    let rows_base = base.clone();
    let rows = warp::get()
        .and(warp::path!("rest" / "v1" / String))
        .and(warp::query::<HashMap<String, String>>())
        .map(move |table: String, query: HashMap<String, String>| {
            let base = rows_base.get().cloned().unwrap_or_default();
            let row = json!({
                "unique_id": row_key,
                "image_url": format!("{}/storage/v1/object/public/inputs/new.png", base),
            });
            match table.as_str() {
                "inputimagetable" => {
                    let body = match query.get("unique_id") {
                        Some(filter) if *filter != format!("eq.{}", row_key) => json!([]),
                        _ => json!([row]),
                    };
                    warp::reply::with_status(warp::reply::json(&body), StatusCode::OK)
                }
                "emptytable" => warp::reply::with_status(warp::reply::json(&json!([])), StatusCode::OK),
                _ => warp::reply::with_status(
                    warp::reply::json(&json!({"message": "relation does not exist"})),
                    StatusCode::NOT_FOUND,
                ),
            }
        });

    let upload_log = uploads.clone();
    let upload = warp::post()
        .and(warp::path!("storage" / "v1" / "object" / String / String))
        .and(warp::header::<String>("content-type"))
        .and(warp::body::bytes())
        .map(move |bucket: String, name: String, content_type: String, body: Bytes| {
            upload_log
                .lock()
                .unwrap()
                .push((bucket.clone(), name.clone(), content_type, body.len()));
            warp::reply::with_status(
                warp::reply::json(&json!({"Key": format!("{}/{}", bucket, name)})),
                StatusCode::OK,
            )
        });

    let patch_log = patches.clone();
    let patch = warp::patch()
        .and(warp::path!("rest" / "v1" / String))
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::body::json())
        .map(move |table: String, query: HashMap<String, String>, body: Value| {
            patch_log.lock().unwrap().push((table, query, body));
            warp::reply::with_status(warp::reply(), StatusCode::NO_CONTENT)
        });

    let routes = list
        .or(public)
        .or(authenticated)
        .or(rows)
        .or(upload)
        .or(patch);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let url = format!("http://{}", addr);
    let _ = base.set(url.clone());

    FakeBackend {
        base: url,
        uploads,
        patches,
    }
}

#[tokio::test]
async fn test_list_files_skips_folders() {
    let fake = spawn_backend();
    let files = fake.source().list_files("inputs").await.unwrap();

    let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["old.png", "new.png"]);
    assert!(files[1].created_at > files[0].created_at);
}

#[tokio::test]
async fn test_wrong_key_is_backend_error() {
    let fake = spawn_backend();
    let source = SupabaseSource::new(&BackendConfig::new(fake.base.clone(), "wrong")).unwrap();

    let err = source.list_files("inputs").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("Invalid API key"));
}

#[tokio::test]
async fn test_query_latest_row() {
    let fake = spawn_backend();
    let source = fake.source();

    let row = source
        .query_latest_row("inputimagetable", "created_at", &["unique_id", "image_url"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["unique_id"], "r1");

    let empty = source
        .query_latest_row("emptytable", "created_at", &[])
        .await
        .unwrap();
    assert!(empty.is_none());

    let err = source
        .query_latest_row("missing", "created_at", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::Backend { status: Some(404), .. }));
}

#[tokio::test]
async fn test_fetch_bytes() {
    let fake = spawn_backend();
    let source = fake.source();

    let url = RemoteSource::public_url(&source, "inputs", "new.png");
    assert_eq!(source.fetch_bytes(&url).await.unwrap(), png(6, 4));

    let missing = RemoteSource::public_url(&source, "inputs", "gone.png");
    let err = source.fetch_bytes(&missing).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_load_row_payload_over_http() {
    let fake = spawn_backend();
    let source = fake.source();

    let (payload, id) = load_row_payload(
        &source,
        &LookupRequest::new("inputimagetable", "r1"),
        PayloadKind::Image,
    )
    .await
    .unwrap();
    assert_eq!(id, "r1");
    let image = payload.as_image().unwrap();
    assert_eq!((image.width, image.height), (6, 4));

    let err = load_row_payload(
        &source,
        &LookupRequest::new("inputimagetable", "nope"),
        PayloadKind::Image,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("no row found"));
}

#[tokio::test]
async fn test_uploader_stores_file_and_links_row() {
    let fake = spawn_backend();
    let uploader = Uploader::new(Arc::new(fake.source()));
    let request = UploadRequest::new("outputs", "image").with_row_link(RowLink {
        table: "inputimagetable".into(),
        id_column: "unique_id".into(),
        id: "r1".into(),
        url_column: "output_url".into(),
    });

    let report = uploader
        .upload_image(&ImageTensor::blank(3, 3), &request)
        .await;
    assert!(report.success, "{}", report.message);

    let public_url = report.public_url.unwrap();
    assert_eq!(
        public_url,
        format!("{}/storage/v1/object/public/outputs/{}", fake.base, report.filename)
    );

    let uploads = fake.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, "outputs");
    assert_eq!(uploads[0].1, report.filename);
    assert_eq!(uploads[0].2, "image/png");
    assert!(uploads[0].3 > 0);

    let patches = fake.patches.lock().unwrap().clone();
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].0, "inputimagetable");
    assert_eq!(patches[0].1.get("unique_id").map(String::as_str), Some("eq.r1"));
    assert_eq!(patches[0].2, json!({"output_url": public_url}));
}

async fn wait_dirty(watcher: &Watcher) -> bool {
    for _ in 0..300 {
        if watcher.is_dirty() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// The watcher blocks its caller on stop, so the fake server needs its own worker
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_over_http() {
    let fake = spawn_backend();
    let watcher = Watcher::supabase(PayloadKind::Image).with_interval_override(Duration::from_millis(50));

    watcher
        .start(WatchTarget::new(fake.backend(), SourceSpec::bucket("inputs")))
        .unwrap();
    assert!(wait_dirty(&watcher).await);

    let snapshot = watcher.peek_output();
    assert_eq!(snapshot.cursor.unwrap().to_string(), "new.png @ 2025-01-02T08:30:00+00:00");
    assert_eq!(snapshot.payload.as_image().unwrap().width, 6);

    assert_eq!(watcher.stop().unwrap(), StopOutcome::Joined);
}

#[tokio::test]
async fn test_anon_key_reads_public_urls_only() {
    let fake = spawn_backend();
    let mut backend = fake.backend();
    backend.key_role = KeyRole::Anon;
    let source = SupabaseSource::new(&backend).unwrap();

    let public = source.download_url("inputs", "new.png");
    assert!(public.contains("/object/public/"));
    assert_eq!(source.fetch_bytes(&public).await.unwrap(), png(6, 4));

    let private = source.download_url("private", "secret.png");
    let err = source.fetch_bytes(&private).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_service_role_downloads_private_objects() {
    let fake = spawn_backend();
    let source = fake.source();

    let url = source.download_url("private", "secret.png");
    assert_eq!(
        url,
        format!("{}/storage/v1/object/authenticated/private/secret.png", fake.base)
    );
    assert_eq!(source.fetch_bytes(&url).await.unwrap(), png(5, 5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_polls_private_bucket() {
    let fake = spawn_backend();
    let watcher = Watcher::supabase(PayloadKind::Image).with_interval_override(Duration::from_millis(50));

    watcher
        .start(WatchTarget::new(fake.backend(), SourceSpec::bucket("private")))
        .unwrap();
    assert!(wait_dirty(&watcher).await);
    assert_eq!(watcher.peek_output().payload.as_image().unwrap().width, 5);
    assert_eq!(watcher.status().failures, 0);

    assert_eq!(watcher.stop().unwrap(), StopOutcome::Joined);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_follows_target_backend() {
    let first = spawn_backend_with_row("first-row");
    let second = spawn_backend_with_row("second-row");
    let watcher = Watcher::supabase(PayloadKind::Image).with_interval_override(Duration::from_millis(50));
    let table = SourceSpec::table("inputimagetable");

    watcher
        .start(WatchTarget::new(first.backend(), table.clone()))
        .unwrap();
    assert!(wait_dirty(&watcher).await);
    assert_eq!(
        watcher.peek_output().cursor.unwrap().to_string(),
        "row first-row"
    );
    watcher.stop().unwrap();

    watcher
        .start(WatchTarget::new(second.backend(), table))
        .unwrap();
    assert!(wait_dirty(&watcher).await);
    assert_eq!(
        watcher.peek_output().cursor.unwrap().to_string(),
        "row second-row"
    );

    assert_eq!(watcher.stop().unwrap(), StopOutcome::Joined);
}
