//! Twitter publisher
//!
//! Media goes through the chunked v2 upload (initialize, one append at
//! segment 0, finalize) and the post through `POST /2/tweets`. Every request
//! is signed with the account's OAuth 1.0a user credentials.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Publisher;
use crate::config::TwitterConfig;
use crate::error::{map_status_error, map_transport_error, PlatformError, Result};
use crate::types::{MediaItem, NormalizedPost};

pub mod oauth;

use oauth::OAuthCredentials;

pub const DEFAULT_API_BASE: &str = "https://api.x.com";

/// Base URLs for the tweet and media endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for TwitterEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl TwitterEndpoints {
    /// Both endpoints on one base URL (used against test servers)
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_base: base.clone(),
            upload_base: base,
        }
    }
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    media_type: &'a str,
    total_bytes: u64,
    media_category: &'a str,
    shared: bool,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct MediaData {
    id: String,
}

#[derive(Debug, Serialize)]
struct TweetRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<TweetMedia<'a>>,
}

#[derive(Debug, Serialize)]
struct TweetMedia<'a> {
    media_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

/// Twitter publisher
pub struct TwitterPublisher {
    http: reqwest::Client,
    credentials: OAuthCredentials,
    endpoints: TwitterEndpoints,
}

impl TwitterPublisher {
    pub fn new(config: &TwitterConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            credentials: OAuthCredentials::from(config),
            endpoints: TwitterEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: TwitterEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    fn signed(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let header = self
            .credentials
            .authorization_header(method.as_str(), url, &[])?;
        Ok(self.http.request(method, url).header(AUTHORIZATION, header))
    }

    /// Send a request and return the body of a successful response
    async fn execute(&self, request: RequestBuilder, context: &str) -> Result<String> {
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
            return Err(map_status_error(status, context, &body).into());
        }
        Ok(body)
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T> {
        let body = self.execute(request, context).await?;
        serde_json::from_str(&body).map_err(|e| {
            PlatformError::Posting(format!("{} returned an unexpected response: {}", context, e))
                .into()
        })
    }

    /// Upload one media file and return its media id
    pub async fn upload_media(&self, item: &MediaItem) -> Result<String> {
        let url = format!("{}/2/media/upload/initialize", self.endpoints.upload_base);
        let category = if item.kind.is_video() {
            "tweet_video"
        } else {
            "tweet_image"
        };
        let request = self.signed(Method::POST, &url)?.json(&InitializeRequest {
            media_type: item.mime_type(),
            total_bytes: item.size,
            media_category: category,
            shared: false,
        });
        let init: DataEnvelope<MediaData> = self
            .execute_json(request, "twitter media initialize")
            .await?;
        let media_id = init.data.id;
        debug!("Initialized Twitter upload {} for {}", media_id, item.path().display());

        let bytes = tokio::fs::read(item.path()).await.map_err(|e| {
            PlatformError::Upload(format!("Cannot read {}: {}", item.path().display(), e))
        })?;
        let part = Part::bytes(bytes)
            .file_name("media")
            .mime_str(item.mime_type())
            .map_err(|e| PlatformError::Upload(e.to_string()))?;
        let form = Form::new()
            .text("segment_index", "0")
            .part("media", part);
        let url = format!(
            "{}/2/media/upload/{}/append",
            self.endpoints.upload_base, media_id
        );
        self.execute(
            self.signed(Method::POST, &url)?.multipart(form),
            "twitter media append",
        )
        .await?;

        let url = format!(
            "{}/2/media/upload/{}/finalize",
            self.endpoints.upload_base, media_id
        );
        let _: DataEnvelope<MediaData> = self
            .execute_json(self.signed(Method::POST, &url)?, "twitter media finalize")
            .await?;

        Ok(media_id)
    }

    /// Create a tweet and return its id
    pub async fn create_tweet(&self, text: &str, media_ids: &[String]) -> Result<String> {
        let url = format!("{}/2/tweets", self.endpoints.api_base);
        let body = tweet_request(text, media_ids);
        let created: DataEnvelope<TweetData> = self
            .execute_json(self.signed(Method::POST, &url)?.json(&body), "twitter create tweet")
            .await?;
        Ok(created.data.id)
    }
}

fn tweet_request<'a>(text: &'a str, media_ids: &'a [String]) -> TweetRequest<'a> {
    TweetRequest {
        text,
        media: (!media_ids.is_empty()).then_some(TweetMedia { media_ids }),
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn publish(&self, post: &NormalizedPost) -> Result<String> {
        let mut media_ids = Vec::with_capacity(post.media.len());
        for item in &post.media {
            media_ids.push(self.upload_media(item).await?);
        }

        let tweet_id = self.create_tweet(&post.content, &media_ids).await?;
        info!(
            "[{}]: Posted to Twitter as {} with {} media",
            post.source_id,
            tweet_id,
            media_ids.len()
        );
        Ok(tweet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tweet_request_omits_empty_media() {
        let json = serde_json::to_value(tweet_request("Hello", &[])).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "Hello" }));
    }

    #[test]
    fn test_tweet_request_lists_media_ids() {
        let ids = vec!["11".to_string(), "22".to_string()];
        let json = serde_json::to_value(tweet_request("Hello", &ids)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "text": "Hello", "media": { "media_ids": ["11", "22"] } })
        );
    }

    #[test]
    fn test_single_endpoint_trims_slash() {
        let endpoints = TwitterEndpoints::single("http://127.0.0.1:9000/");
        assert_eq!(endpoints.api_base, "http://127.0.0.1:9000");
        assert_eq!(endpoints.upload_base, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_default_endpoints() {
        let endpoints = TwitterEndpoints::default();
        assert_eq!(endpoints.api_base, DEFAULT_API_BASE);
    }
}
