//! Mastodon user stream via megalodon
//!
//! Works with Mastodon and the Fediverse servers megalodon's Mastodon
//! backend supports. The user stream carries the account's own statuses,
//! including direct ones, which is what the pipeline mirrors.

use async_trait::async_trait;
use megalodon::entities::attachment::AttachmentType;
use megalodon::entities::status::StatusVisibility;
use megalodon::streaming::{Message, Streaming};
use megalodon::{Megalodon, SNS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::StatusSource;
use crate::config::MastodonConfig;
use crate::error::{PlatformError, Result};
use crate::types::{AttachmentKind, RemoteAttachment, SourceStatus, StreamEvent, Visibility};

/// Wait before listening again after the stream connection ends
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type MastodonClient = Box<dyn Megalodon + Send + Sync>;

/// The account whose posts a pipeline mirrors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MastodonAccount {
    pub id: String,
    pub username: String,
}

/// An authenticated Mastodon client and the account it belongs to
pub struct MastodonConnection {
    client: MastodonClient,
    account: MastodonAccount,
}

impl MastodonConnection {
    /// Create the client and resolve the account through `verify_credentials`
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` when the token is rejected and
    /// `PlatformError::Network` when the server cannot be reached.
    pub async fn connect(config: &MastodonConfig) -> Result<Self> {
        let instance_url =
            if config.server.starts_with("http://") || config.server.starts_with("https://") {
                config.server.trim_end_matches('/').to_string()
            } else {
                format!("https://{}", config.server.trim_end_matches('/'))
            };

        debug!(
            "Creating Mastodon client for {} (client id {})",
            instance_url, config.client_id
        );
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url,
            Some(config.access_token.clone()),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        let response = client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "verify credentials"))?;

        let account = MastodonAccount {
            id: response.json.id,
            username: response.json.username,
        };
        Ok(Self { client, account })
    }

    pub fn account(&self) -> &MastodonAccount {
        &self.account
    }

    /// Start the user stream in a background task
    pub fn into_source(self) -> MastodonSource {
        MastodonSource::spawn(self.client)
    }
}

/// User stream events handed over by megalodon's callback
///
/// megalodon invokes the callback synchronously, so events go through an
/// unbounded channel; backpressure applies further down at the publish
/// queue. The listener task is aborted when the source is dropped.
pub struct MastodonSource {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    task: JoinHandle<()>,
}

impl MastodonSource {
    fn spawn(client: MastodonClient) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(listen_forever(client, sender));
        Self { events, task }
    }
}

impl Drop for MastodonSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl StatusSource for MastodonSource {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

async fn listen_forever(client: MastodonClient, sender: mpsc::UnboundedSender<StreamEvent>) {
    loop {
        let streaming: Box<dyn Streaming + Send + Sync> = client.user_streaming().await;
        streaming.listen(forward_messages(sender.clone())).await;

        if sender.is_closed() {
            return;
        }
        warn!("Mastodon stream ended, listening again in {:?}", RECONNECT_DELAY);
        if sender
            .send(StreamEvent::Error("stream connection closed".to_string()))
            .is_err()
        {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Callback for `Streaming::listen` that hands each message to ingestion
pub(crate) fn forward_messages(
    sender: mpsc::UnboundedSender<StreamEvent>,
) -> Box<dyn Fn(Message) + Send + Sync> {
    Box::new(move |message: Message| {
        if sender.send(event_from_message(message)).is_err() {
            debug!("Stream message dropped, pipeline is gone");
        }
    })
}

fn event_from_message(message: Message) -> StreamEvent {
    match message {
        Message::Update(status) => StreamEvent::Update(status_from_entity(status)),
        _ => StreamEvent::Other,
    }
}

/// Keep the fields of a megalodon status the pipeline looks at
pub fn status_from_entity(status: megalodon::entities::Status) -> SourceStatus {
    #[allow(unreachable_patterns)]
    let visibility = match status.visibility {
        StatusVisibility::Direct => Visibility::Direct,
        StatusVisibility::Private => Visibility::Private,
        StatusVisibility::Unlisted => Visibility::Unlisted,
        _ => Visibility::Public,
    };

    let attachments = status
        .media_attachments
        .into_iter()
        .map(|attachment| {
            #[allow(unreachable_patterns)]
            let kind = match attachment.r#type {
                AttachmentType::Image => AttachmentKind::Image,
                AttachmentType::Gifv => AttachmentKind::Gif,
                AttachmentType::Video => AttachmentKind::Video,
                AttachmentType::Audio => AttachmentKind::Audio,
                _ => AttachmentKind::Unknown,
            };
            RemoteAttachment {
                url: attachment.url,
                kind,
                description: attachment.description,
            }
        })
        .collect();

    SourceStatus {
        id: status.id,
        account_id: status.account.id,
        visibility,
        is_reblog: status.reblog.is_some(),
        in_reply_to_id: status.in_reply_to_id,
        in_reply_to_account_id: status.in_reply_to_account_id,
        content: status.content,
        attachments,
    }
}

/// Map megalodon errors to PlatformError
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    if error_lower.contains("401")
        || error_lower.contains("403")
        || error_lower.contains("unauthorized")
        || error_lower.contains("forbidden")
        || error_lower.contains("token")
    {
        PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}. \
                Suggestion: Verify the access token is valid and has not been revoked.",
            context, error_str
        ))
    } else if error_lower.contains("429") || error_lower.contains("too many requests") {
        PlatformError::RateLimit(format!("Mastodon rate limit exceeded ({}): {}", context, error_str))
    } else {
        PlatformError::Network(format!(
            "Mastodon error ({}): {}. \
                Suggestion: Check your network connection and instance availability.",
            context, error_str
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "username": "poster",
            "acct": "poster",
            "display_name": "Poster",
            "locked": false,
            "created_at": "2024-01-01T00:00:00Z",
            "followers_count": 0,
            "following_count": 0,
            "statuses_count": 1,
            "note": "",
            "url": "https://mastodon.example/@poster",
            "avatar": "",
            "avatar_static": "",
            "header": "",
            "header_static": "",
            "emojis": [],
            "fields": [],
            "bot": false
        })
    }

    fn status_entity(visibility: &str) -> megalodon::entities::Status {
        serde_json::from_value(json!({
            "id": "42",
            "uri": "https://mastodon.example/statuses/42",
            "account": account_json("109"),
            "in_reply_to_id": null,
            "in_reply_to_account_id": null,
            "reblog": null,
            "content": "<p>Hello</p>",
            "created_at": "2024-01-01T00:00:00Z",
            "emojis": [],
            "replies_count": 0,
            "reblogs_count": 0,
            "favourites_count": 0,
            "sensitive": false,
            "spoiler_text": "",
            "visibility": visibility,
            "media_attachments": [
                {
                    "id": "1",
                    "type": "gifv",
                    "url": "https://files.example/1.mp4",
                    "description": "loop"
                },
                { "id": "2", "type": "audio", "url": "https://files.example/2.mp3" }
            ],
            "mentions": [],
            "tags": [],
            "quote": false
        }))
        .unwrap()
    }

    #[test]
    fn test_status_from_entity_keeps_filter_fields() {
        let status = status_from_entity(status_entity("direct"));

        assert_eq!(status.id, "42");
        assert_eq!(status.account_id, "109");
        assert_eq!(status.visibility, Visibility::Direct);
        assert!(!status.is_reblog);
        assert_eq!(status.content, "<p>Hello</p>");
        assert_eq!(status.attachments.len(), 2);
        assert_eq!(status.attachments[0].kind, AttachmentKind::Gif);
        assert_eq!(status.attachments[0].description.as_deref(), Some("loop"));
        assert_eq!(status.attachments[1].kind, AttachmentKind::Audio);
    }

    #[tokio::test]
    async fn test_forwarded_update_reaches_source() {
        let (sender, mut events) = mpsc::unbounded_channel();
        let callback = forward_messages(sender);

        callback(Message::Update(status_entity("direct")));
        callback(Message::Heartbeat());

        match events.recv().await {
            Some(StreamEvent::Update(status)) => assert_eq!(status.id, "42"),
            other => panic!("Expected update, got {:?}", other),
        }
        assert!(matches!(events.recv().await, Some(StreamEvent::Other)));
    }

    #[test]
    fn test_forward_after_source_dropped_is_silent() {
        let (sender, events) = mpsc::unbounded_channel();
        drop(events);
        let callback = forward_messages(sender);
        callback(Message::Delete("42".to_string()));
    }

    #[test]
    fn test_unlisted_and_private_visibility() {
        assert_eq!(
            status_from_entity(status_entity("unlisted")).visibility,
            Visibility::Unlisted
        );
        assert_eq!(
            status_from_entity(status_entity("private")).visibility,
            Visibility::Private
        );
    }
}
