//! Attachment download and JPEG re-encoding
//!
//! Downloads land in `crosspost-media-*` temporary files owned by the
//! resulting [`MediaItem`]. Re-encoding writes a separate
//! `crosspost-media-convert-*` file and never touches the original.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::error::MediaError;
use crate::types::{AttachmentKind, MediaItem, MediaKind, RemoteAttachment};

/// Files at or above this size are re-encoded before a BlueSky upload
pub const RESIZE_CEILING: u64 = 1_000_000;

const QUALITY_START: u8 = 90;
const QUALITY_STEP: u8 = 10;
const QUALITY_FLOOR: u8 = 10;

/// Media tag for a remote attachment kind, `None` when unsupported
pub fn media_kind(kind: AttachmentKind) -> Option<MediaKind> {
    match kind {
        AttachmentKind::Image => Some(MediaKind::Image),
        AttachmentKind::Gif | AttachmentKind::Video => Some(MediaKind::Video),
        AttachmentKind::Audio | AttachmentKind::Unknown => None,
    }
}

/// Fetches status attachments into temporary files
#[derive(Clone)]
pub struct MediaDownloader {
    http: reqwest::Client,
    temp_dir: Option<PathBuf>,
}

impl MediaDownloader {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            temp_dir: None,
        }
    }

    /// Place downloads in `dir` instead of the system temporary directory
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Download every supported attachment
    ///
    /// Unsupported or failed attachments are skipped; the rest keep their
    /// order. An empty result is not an error.
    pub async fn download_all(
        &self,
        status_id: &str,
        attachments: &[RemoteAttachment],
    ) -> Vec<MediaItem> {
        if attachments.is_empty() {
            return Vec::new();
        }
        debug!("[{}]: Processing {} attachments", status_id, attachments.len());

        let mut items = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            if attachment.url.is_empty() {
                continue;
            }
            let Some(kind) = media_kind(attachment.kind) else {
                debug!(
                    "[{}]: Skipping unsupported {:?} attachment {}",
                    status_id, attachment.kind, attachment.url
                );
                continue;
            };
            match self.download(attachment, kind).await {
                Ok(item) => {
                    debug!(
                        "[{}]: Downloaded {} ({} bytes) into {}",
                        status_id,
                        attachment.url,
                        item.size,
                        item.path().display()
                    );
                    items.push(item);
                }
                Err(e) => error!("[{}]: Cannot download attachment {}: {}", status_id, attachment.url, e),
            }
        }

        debug!("[{}]: Processed {} attachments", status_id, items.len());
        items
    }

    async fn download(
        &self,
        attachment: &RemoteAttachment,
        kind: MediaKind,
    ) -> Result<MediaItem, MediaError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("crosspost-media-");
        let temp = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (file, path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut response = self
            .http
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MediaError::Download(format!("HTTP {}", response.status())));
        }

        let mut size = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(MediaItem::new(path, size, kind, attachment.description.clone()))
    }
}

/// A re-encoded copy of an oversized image
#[derive(Debug)]
pub struct ResizedMedia {
    pub file: TempPath,
    pub size: u64,
    pub quality: u8,
}

/// Encode an image as baseline JPEG at the given quality
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&rgb)?;
    Ok(buffer)
}

/// Re-encode `path` until it is smaller than `ceiling`
///
/// The converted file is created next to `path`. Returns `Ok(None)` when
/// `size` is already below the ceiling. Qualities
/// 90, 80, ... 10 are tried in turn; if quality 10 is still too large the
/// result is [`MediaError::TooLarge`]. CPU bound, call it from a blocking
/// context.
pub fn shrink_to_ceiling(
    path: &Path,
    size: u64,
    ceiling: u64,
) -> Result<Option<ResizedMedia>, MediaError> {
    if size < ceiling {
        return Ok(None);
    }

    let bytes = std::fs::read(path)?;
    let image = image::load_from_memory(&bytes)?;

    let mut quality = QUALITY_START;
    loop {
        let encoded = encode_jpeg(&image, quality)?;
        if (encoded.len() as u64) < ceiling {
            let mut builder = tempfile::Builder::new();
            builder.prefix("crosspost-media-convert-");
            let mut out = match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                Some(dir) => builder.tempfile_in(dir)?,
                None => builder.tempfile()?,
            };
            out.write_all(&encoded)?;
            out.flush()?;
            return Ok(Some(ResizedMedia {
                file: out.into_temp_path(),
                size: encoded.len() as u64,
                quality,
            }));
        }
        if quality <= QUALITY_FLOOR {
            return Err(MediaError::TooLarge {
                path: path.display().to_string(),
                size,
            });
        }
        quality -= QUALITY_STEP;
    }
}
