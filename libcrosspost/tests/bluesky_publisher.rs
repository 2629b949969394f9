//! BlueSky publisher against an in-process stand-in for a PDS and AppView

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use image::{DynamicImage, Rgb, RgbImage};
use libcrosspost::config::BlueskyConfig;
use libcrosspost::error::{CrosspostError, PlatformError};
use libcrosspost::media::{encode_jpeg, RESIZE_CEILING};
use libcrosspost::publishers::bluesky::BlueskyPublisher;
use libcrosspost::publishers::Publisher;
use libcrosspost::types::{MediaItem, MediaKind, NormalizedPost};
use serde_json::{json, Value};
use std::collections::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DID: &str = "did:plc:poster";
const JWT: &str = "access-jwt";

#[derive(Clone, Default)]
struct MockPds {
    sessions: Arc<Mutex<usize>>,
    uploads: Arc<Mutex<Vec<(String, String, Bytes)>>>,
    records: Arc<Mutex<Vec<Value>>>,
    reject_records: bool,
}

impl MockPds {
    fn session_count(&self) -> usize {
        *self.sessions.lock().unwrap()
    }

    fn records(&self) -> Vec<Value> {
        self.records.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn create_session(
    State(pds): State<MockPds>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    *pds.sessions.lock().unwrap() += 1;
    if body["password"] != "app-password" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "AuthenticationRequired",
                "message": "Invalid identifier or password"
            })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "did": DID,
            "handle": body["identifier"],
            "accessJwt": JWT,
            "refreshJwt": "refresh-jwt"
        })),
    )
}

async fn upload_blob(State(pds): State<MockPds>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let size = body.len();
    let mime = header(&headers, "content-type");
    pds.uploads
        .lock()
        .unwrap()
        .push((header(&headers, "authorization"), mime.clone(), body));
    Json(json!({
        "blob": {
            "$type": "blob",
            "ref": { "$link": "bafkreiblob" },
            "mimeType": mime,
            "size": size
        }
    }))
}

async fn resolve_handle(Query(query): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    match query.get("handle").map(String::as_str) {
        Some("alice.bsky.social") => (StatusCode::OK, Json(json!({ "did": "did:plc:alice" }))),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "InvalidRequest", "message": "Unable to resolve handle" })),
        ),
    }
}

async fn search_actors(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let actors = match query.get("q").map(String::as_str) {
        Some("carol") => json!([
            { "did": "did:plc:other", "handle": "someone.example.com" },
            { "did": "did:plc:carol", "handle": "Carol.example.com" }
        ]),
        _ => json!([]),
    };
    Json(json!({ "actors": actors }))
}

async fn create_record(
    State(pds): State<MockPds>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if header(&headers, "authorization") != format!("Bearer {}", JWT) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "InvalidToken", "message": "Bad token" })),
        );
    }
    if pds.reject_records {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "InvalidRequest",
                "message": "Invalid app.bsky.feed.post record: Record/text must not be longer than 300 graphemes"
            })),
        );
    }
    pds.records.lock().unwrap().push(body);
    (
        StatusCode::OK,
        Json(json!({
            "uri": format!("at://{}/app.bsky.feed.post/3k2", DID),
            "cid": "bafyreirecord"
        })),
    )
}

async fn serve(pds: MockPds) -> anyhow::Result<String> {
    let app = Router::new()
        .route("/xrpc/com.atproto.server.createSession", post(create_session))
        .route("/xrpc/com.atproto.repo.uploadBlob", post(upload_blob))
        .route("/xrpc/com.atproto.identity.resolveHandle", get(resolve_handle))
        .route("/xrpc/app.bsky.actor.searchActors", get(search_actors))
        .route("/xrpc/com.atproto.repo.createRecord", post(create_record))
        .with_state(pds);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok(format!("http://{}", addr))
}

fn config(base: &str, password: &str) -> BlueskyConfig {
    BlueskyConfig {
        server: base.to_string(),
        username: "poster.bsky.social".to_string(),
        password: password.to_string(),
    }
}

async fn connect(base: &str) -> anyhow::Result<BlueskyPublisher> {
    let publisher =
        BlueskyPublisher::connect(&config(base, "app-password"), reqwest::Client::new()).await?;
    Ok(publisher.with_appview(base))
}

fn media(bytes: &[u8], kind: MediaKind, alt: Option<&str>) -> MediaItem {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    MediaItem::new(
        file.into_temp_path(),
        bytes.len() as u64,
        kind,
        alt.map(str::to_string),
    )
}

#[tokio::test]
async fn test_rejected_login_fails_setup() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;

    let result = BlueskyPublisher::connect(&config(&base, "wrong"), reqwest::Client::new()).await;

    match result {
        Err(CrosspostError::Platform(PlatformError::Authentication(message))) => {
            assert!(message.contains("AuthenticationRequired"));
        }
        Err(other) => panic!("Expected authentication error, got {}", other),
        Ok(_) => panic!("Expected authentication error"),
    }
    assert_eq!(pds.session_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_text_post_record() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    let post = NormalizedPost::new("1".to_string(), "Plain words".to_string(), Vec::new());
    let uri = publisher.publish(&post).await?;

    assert_eq!(uri, format!("at://{}/app.bsky.feed.post/3k2", DID));
    let records = pds.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["repo"], DID);
    assert_eq!(records[0]["collection"], "app.bsky.feed.post");

    let record = &records[0]["record"];
    assert_eq!(record["$type"], "app.bsky.feed.post");
    assert_eq!(record["text"], "Plain words");
    assert_eq!(record["langs"], json!(["en-US"]));
    assert!(record.get("embed").is_none());
    assert!(record.get("facets").is_none());

    let created_at = record["createdAt"].as_str().unwrap();
    assert!(created_at.ends_with('Z'));
    let fraction = created_at.rsplit('.').next().unwrap();
    assert_eq!(fraction.len(), "123456Z".len());
    Ok(())
}

#[tokio::test]
async fn test_images_uploaded_videos_skipped() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    let post = NormalizedPost::new(
        "2".to_string(),
        "Look".to_string(),
        vec![
            media(b"small-image", MediaKind::Image, Some("a cat")),
            media(b"video", MediaKind::Video, None),
        ],
    );
    publisher.publish(&post).await?;

    let uploads = pds.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, format!("Bearer {}", JWT));
    assert_eq!(uploads[0].1, "image/jpeg");
    assert_eq!(&uploads[0].2[..], b"small-image");

    let record = &pds.records()[0]["record"];
    assert_eq!(record["embed"]["$type"], "app.bsky.embed.images");
    let images = record["embed"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["alt"], "a cat");
    assert_eq!(images[0]["image"]["ref"]["$link"], "bafkreiblob");
    assert_eq!(images[0]["image"]["size"], 11);
    Ok(())
}

#[tokio::test]
async fn test_facets_in_pass_order_with_resolved_mentions() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    let text = "Hi @alice #rust https://a.co @nobody @carol";
    let post = NormalizedPost::new("3".to_string(), text.to_string(), Vec::new());
    publisher.publish(&post).await?;

    let record = &pds.records()[0]["record"];
    assert_eq!(
        record["facets"],
        json!([
            {
                "index": { "byteStart": 10, "byteEnd": 15 },
                "features": [{ "$type": "app.bsky.richtext.facet#tag", "tag": "rust" }]
            },
            {
                "index": { "byteStart": 16, "byteEnd": 28 },
                "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": "https://a.co" }]
            },
            {
                "index": { "byteStart": 3, "byteEnd": 9 },
                "features": [{ "$type": "app.bsky.richtext.facet#mention", "did": "did:plc:alice" }]
            },
            {
                "index": { "byteStart": 37, "byteEnd": 43 },
                "features": [{ "$type": "app.bsky.richtext.facet#mention", "did": "did:plc:carol" }]
            }
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_transformed_status_gets_tag_and_link_facets() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    let text = libcrosspost::transform::ContentTransformer::default()
        .transform("42", "<p>Hello #world! See https://a.co</p>");
    assert_eq!(text, "Hello #world! See https://a.co");
    let post = NormalizedPost::new("42".to_string(), text, Vec::new());
    publisher.publish(&post).await?;

    let record = &pds.records()[0]["record"];
    assert_eq!(
        record["facets"],
        json!([
            {
                "index": { "byteStart": 6, "byteEnd": 12 },
                "features": [{ "$type": "app.bsky.richtext.facet#tag", "tag": "world" }]
            },
            {
                "index": { "byteStart": 18, "byteEnd": 30 },
                "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": "https://a.co" }]
            }
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_session_reused_between_posts() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    for id in ["1", "2", "3"] {
        let post = NormalizedPost::new(id.to_string(), format!("post {}", id), Vec::new());
        publisher.publish(&post).await?;
    }

    assert_eq!(pds.session_count(), 1);
    assert_eq!(pds.records().len(), 3);
    Ok(())
}

fn noise_jpeg(dir: &Path, side: u32) -> (PathBuf, u64) {
    let mut rng = StdRng::seed_from_u64(11);
    let mut img = RgbImage::new(side, side);
    for pixel in img.pixels_mut() {
        *pixel = Rgb([rng.gen(), rng.gen(), rng.gen()]);
    }
    let encoded = encode_jpeg(&DynamicImage::ImageRgb8(img), 100).unwrap();
    let path = dir.join("crosspost-media-original.jpg");
    std::fs::write(&path, &encoded).unwrap();
    (path, encoded.len() as u64)
}

#[tokio::test]
async fn test_oversized_image_reencoded_before_upload() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    let dir = tempfile::tempdir()?;
    let (original, size) = noise_jpeg(dir.path(), 1200);
    assert!(size >= RESIZE_CEILING);
    let item = MediaItem::new(
        tempfile::TempPath::from_path(&original),
        size,
        MediaKind::Image,
        None,
    );
    let post = NormalizedPost::new("5".to_string(), "Big picture".to_string(), vec![item]);

    publisher.publish(&post).await?;

    let uploads = pds.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    let uploaded = &uploads[0].2;
    assert!((uploaded.len() as u64) < RESIZE_CEILING);
    let decoded = image::load_from_memory(uploaded)?;
    assert_eq!((decoded.width(), decoded.height()), (1200, 1200));

    let record = &pds.records()[0]["record"];
    assert_eq!(record["embed"]["images"][0]["image"]["size"], uploaded.len());

    // The original is untouched and the converted copy is gone
    assert_eq!(std::fs::metadata(&original)?.len(), size);
    let remaining: Vec<PathBuf> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(remaining, vec![original.clone()]);

    drop(post);
    assert!(!original.exists());
    Ok(())
}

#[tokio::test]
async fn test_rejected_record_is_publish_failure() -> anyhow::Result<()> {
    let pds = MockPds {
        reject_records: true,
        ..Default::default()
    };
    let base = serve(pds.clone()).await?;
    let publisher = connect(&base).await?;

    let post = NormalizedPost::new("6".to_string(), "Too long".to_string(), Vec::new());
    match publisher.publish(&post).await {
        Err(CrosspostError::Platform(PlatformError::Posting(message))) => {
            assert!(message.contains("bluesky createRecord"));
            assert!(message.contains("HTTP 400"));
            assert!(message.contains("InvalidRequest"));
        }
        Err(other) => panic!("Expected posting error, got {}", other),
        Ok(uri) => panic!("Expected posting error, got {}", uri),
    }
    assert!(pds.records().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stale_session_logs_in_again() -> anyhow::Result<()> {
    let pds = MockPds::default();
    let base = serve(pds.clone()).await?;
    let publisher = BlueskyPublisher::connect(&config(&base, "app-password"), reqwest::Client::new())
        .await?
        .with_appview(&base)
        .with_session_max_age(Duration::ZERO);
    assert_eq!(pds.session_count(), 1);

    for id in ["1", "2"] {
        let post = NormalizedPost::new(id.to_string(), format!("post {}", id), Vec::new());
        publisher.publish(&post).await?;
    }

    assert_eq!(pds.session_count(), 3);
    assert_eq!(pds.records().len(), 2);
    Ok(())
}
