//! Core types for CrossPost

use std::path::Path;
use tempfile::TempPath;

/// Visibility of a streamed status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

/// Declared kind of a remote attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Gif,
    Video,
    Audio,
    Unknown,
}

/// An attachment as announced by the streaming source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttachment {
    pub url: String,
    pub kind: AttachmentKind,
    pub description: Option<String>,
}

/// The parts of a streamed status the pipeline looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub id: String,
    pub account_id: String,
    pub visibility: Visibility,
    pub is_reblog: bool,
    pub in_reply_to_id: Option<String>,
    pub in_reply_to_account_id: Option<String>,
    /// HTML content as delivered by the server
    pub content: String,
    pub attachments: Vec<RemoteAttachment>,
}

/// One item read from a streaming source
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A new status on the user timeline
    Update(SourceStatus),
    /// Transport-level problem reported by the source
    Error(String),
    /// Notifications, deletes, heartbeats and other control traffic
    Other,
}

/// Media tag of a downloaded attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// MIME type sent to publishers for this kind
    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

/// A downloaded attachment backed by a temporary file
///
/// The file is removed when the item is dropped.
#[derive(Debug)]
pub struct MediaItem {
    file: TempPath,
    pub size: u64,
    pub kind: MediaKind,
    pub alt_text: Option<String>,
}

impl MediaItem {
    pub fn new(file: TempPath, size: u64, kind: MediaKind, alt_text: Option<String>) -> Self {
        Self {
            file,
            size,
            kind,
            alt_text,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }
}

/// A transformed status ready for the publishers
///
/// Dropping the post deletes every media file it owns.
#[derive(Debug)]
pub struct NormalizedPost {
    /// Id of the status this post was built from
    pub source_id: String,
    pub content: String,
    pub media: Vec<MediaItem>,
}

impl NormalizedPost {
    pub fn new(source_id: String, content: String, media: Vec<MediaItem>) -> Self {
        Self {
            source_id,
            content,
            media,
        }
    }
}
