//! BlueSky publisher
//!
//! Talks XRPC to the account's PDS over plain HTTP: `createSession` to log
//! in, `uploadBlob` per image and `createRecord` for the post itself. Images
//! at or above [`RESIZE_CEILING`] are re-encoded as JPEG first. Videos are
//! not supported by the images embed and are skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::Publisher;
use crate::config::BlueskyConfig;
use crate::error::{
    map_status_error, map_transport_error, CrosspostError, MediaError, PlatformError, Result,
};
use crate::media::{shrink_to_ceiling, RESIZE_CEILING};
use crate::types::{MediaItem, NormalizedPost};

pub mod facets;
pub mod session;

use facets::{compute_facets, Facet, HandleResolver};
use session::{Session, SESSION_REFRESH_INTERVAL};

/// Public AppView used for actor search
pub const DEFAULT_APPVIEW: &str = "https://public.api.bsky.app";

/// Appended to bare handles before resolution
pub const DEFAULT_HANDLE_SUFFIX: &str = "bsky.social";

pub const POST_COLLECTION: &str = "app.bsky.feed.post";
const IMAGES_EMBED: &str = "app.bsky.embed.images";
const POST_LANGS: &[&str] = &["en-US"];

/// Normalize a configured server into a base URL
///
/// Bare hosts get `https://`; an explicit `http://` is kept for local PDSes.
pub fn server_base_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("https://{}", server)
    }
}

/// Record creation time with microsecond precision, UTC
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// Blob reference returned by `uploadBlob` and embedded as-is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(rename = "$type", default = "blob_type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub reference: BlobLink,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

fn blob_type() -> String {
    "blob".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbeddedImage {
    pub alt: String,
    pub image: Blob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagesEmbed {
    #[serde(rename = "$type")]
    pub kind: &'static str,
    pub images: Vec<EmbeddedImage>,
}

/// An `app.bsky.feed.post` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    #[serde(rename = "$type")]
    pub kind: &'static str,
    pub text: String,
    pub langs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<ImagesEmbed>,
}

impl PostRecord {
    /// The embed is only present when at least one image was uploaded
    pub fn new(
        text: &str,
        facets: Vec<Facet>,
        images: Vec<EmbeddedImage>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: POST_COLLECTION,
            text: text.to_string(),
            langs: POST_LANGS.iter().map(|lang| lang.to_string()).collect(),
            facets,
            created_at: format_timestamp(created_at),
            embed: (!images.is_empty()).then_some(ImagesEmbed {
                kind: IMAGES_EMBED,
                images,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    #[serde(default)]
    did: String,
    #[serde(default)]
    access_jwt: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    repo: &'a str,
    collection: &'static str,
    record: &'a PostRecord,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
    #[serde(default)]
    cid: String,
}

#[derive(Debug, Deserialize)]
struct UploadBlobResponse {
    blob: Blob,
}

#[derive(Debug, Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

#[derive(Debug, Deserialize)]
struct SearchActorsResponse {
    #[serde(default)]
    actors: Vec<Actor>,
}

#[derive(Debug, Deserialize)]
struct Actor {
    did: String,
    handle: String,
}

/// Error body XRPC servers send with non-2xx responses
#[derive(Debug, Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

/// BlueSky publisher
pub struct BlueskyPublisher {
    http: reqwest::Client,
    base_url: String,
    appview_url: String,
    username: String,
    password: String,
    session: Mutex<Option<Session>>,
    session_max_age: Duration,
}

impl BlueskyPublisher {
    pub fn new(config: &BlueskyConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: server_base_url(&config.server),
            appview_url: DEFAULT_APPVIEW.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            session: Mutex::new(None),
            session_max_age: SESSION_REFRESH_INTERVAL,
        }
    }

    /// Create the publisher and log in once
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` when the credentials are
    /// rejected.
    pub async fn connect(config: &BlueskyConfig, http: reqwest::Client) -> Result<Self> {
        let publisher = Self::new(config, http);
        publisher.session().await?;
        Ok(publisher)
    }

    /// Use a different AppView for actor search
    pub fn with_appview(mut self, url: &str) -> Self {
        self.appview_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Log in again once a session is older than `max_age`
    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    fn xrpc_url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.base_url, method)
    }

    /// Current session, logging in again when missing or stale
    async fn session(&self) -> Result<Session> {
        let mut current = self.session.lock().await;
        if let Some(session) = current.as_ref() {
            if session.is_fresh(self.session_max_age) {
                return Ok(session.clone());
            }
            debug!("BlueSky session for {} is stale, logging in again", self.username);
        }

        let session = self.create_session().await?;
        *current = Some(session.clone());
        Ok(session)
    }

    async fn create_session(&self) -> Result<Session> {
        let context = "bluesky createSession";
        let request = self
            .http
            .post(self.xrpc_url("com.atproto.server.createSession"))
            .json(&CreateSessionRequest {
                identifier: &self.username,
                password: &self.password,
            });
        // Any rejected login is an auth problem, whatever status the PDS picks
        let response: CreateSessionResponse =
            read_xrpc(request, context).await.map_err(|e| match e {
                CrosspostError::Platform(PlatformError::Posting(detail)) => {
                    PlatformError::Authentication(detail).into()
                }
                other => other,
            })?;
        if response.did.is_empty() || response.access_jwt.is_empty() {
            return Err(PlatformError::Authentication(format!(
                "{} returned no session for {}",
                context, self.username
            ))
            .into());
        }
        info!("Logged in to BlueSky as {} ({})", self.username, response.did);
        Ok(Session::new(response.did, response.access_jwt))
    }

    /// Upload one image, shrinking it first when it is too large
    pub async fn upload_image(&self, session: &Session, item: &MediaItem) -> Result<Blob> {
        let path = item.path().to_path_buf();
        let size = item.size;
        let resized = tokio::task::spawn_blocking(move || {
            shrink_to_ceiling(&path, size, RESIZE_CEILING)
        })
        .await
        .map_err(|e| PlatformError::Upload(format!("Resize task failed: {}", e)))??;

        let bytes = match &resized {
            Some(resized) => {
                debug!(
                    "Re-encoded {} from {} to {} bytes at quality {}",
                    item.path().display(),
                    size,
                    resized.size,
                    resized.quality
                );
                tokio::fs::read(&resized.file).await
            }
            None => tokio::fs::read(item.path()).await,
        }
        .map_err(MediaError::from)?;

        let request = self
            .http
            .post(self.xrpc_url("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, item.mime_type())
            .body(bytes);
        let response: UploadBlobResponse = read_xrpc(request, "bluesky uploadBlob").await?;
        Ok(response.blob)
    }

    async fn search_actor(&self, handle: &str) -> Option<String> {
        let request = self
            .http
            .get(format!("{}/xrpc/app.bsky.actor.searchActors", self.appview_url))
            .query(&[("q", handle)]);
        let response: SearchActorsResponse = match read_xrpc(request, "bluesky searchActors").await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Actor search for {} failed: {}", handle, e);
                return None;
            }
        };

        let wanted = handle.to_lowercase();
        response
            .actors
            .into_iter()
            .find(|actor| actor.handle.to_lowercase().starts_with(&wanted))
            .map(|actor| actor.did)
    }
}

#[async_trait]
impl HandleResolver for BlueskyPublisher {
    async fn resolve_handle(&self, handle: &str) -> Option<String> {
        let full = if handle.contains('.') {
            handle.to_string()
        } else {
            format!("{}.{}", handle, DEFAULT_HANDLE_SUFFIX)
        };

        let request = self
            .http
            .get(self.xrpc_url("com.atproto.identity.resolveHandle"))
            .query(&[("handle", full.as_str())]);
        match read_xrpc::<ResolveHandleResponse>(request, "bluesky resolveHandle").await {
            Ok(resolved) if !resolved.did.is_empty() => return Some(resolved.did),
            Ok(_) => {}
            Err(e) => debug!("Cannot resolve handle {}: {}", full, e),
        }

        self.search_actor(handle).await
    }
}

#[async_trait]
impl Publisher for BlueskyPublisher {
    fn name(&self) -> &str {
        "bluesky"
    }

    async fn publish(&self, post: &NormalizedPost) -> Result<String> {
        let session = self.session().await?;

        let mut images = Vec::new();
        for item in &post.media {
            if item.kind.is_video() {
                debug!(
                    "[{}]: Skipping video {} for BlueSky",
                    post.source_id,
                    item.path().display()
                );
                continue;
            }
            let blob = self.upload_image(&session, item).await?;
            images.push(EmbeddedImage {
                alt: item.alt_text.clone().unwrap_or_default(),
                image: blob,
            });
        }

        let facets = compute_facets(&post.content, self).await;
        let record = PostRecord::new(&post.content, facets, images, Utc::now());
        let request = self
            .http
            .post(self.xrpc_url("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&CreateRecordRequest {
                repo: &session.did,
                collection: POST_COLLECTION,
                record: &record,
            });
        let created: CreateRecordResponse = read_xrpc(request, "bluesky createRecord").await?;

        info!(
            "[{}]: Posted to BlueSky as {} ({})",
            post.source_id, created.uri, created.cid
        );
        Ok(created.uri)
    }
}

/// Send an XRPC request and decode a successful JSON response
async fn read_xrpc<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    context: &str,
) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| map_transport_error(e, context))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| map_transport_error(e, context))?;

    if !status.is_success() {
        let detail = match serde_json::from_str::<XrpcError>(&body) {
            Ok(xrpc) if !xrpc.error.is_empty() => format!("{}: {}", xrpc.error, xrpc.message),
            _ => body,
        };
        return Err(map_status_error(status, context, &detail).into());
    }

    serde_json::from_str(&body).map_err(|e| {
        PlatformError::Posting(format!("{} returned an unexpected response: {}", context, e)).into()
    })
}
