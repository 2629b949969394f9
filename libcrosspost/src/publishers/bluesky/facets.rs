//! Rich-text facets for BlueSky posts
//!
//! Facets annotate byte ranges of the post text (UTF-8 offsets, not
//! characters) as hashtags, links or mentions. Mentions need a DID, which is
//! looked up through a [`HandleResolver`]; unresolved mentions stay plain text.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;

static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#[^\d\s]\S*").unwrap());

static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"https?://(www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_+.~#?&/=]*[-a-zA-Z0-9@%_+~#/=])?",
    )
    .unwrap()
});

static MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@([a-zA-Z0-9-]{0,61}\.?[a-zA-Z0-9-]{0,30}\.?[a-zA-Z0-9-]{0,30})(\s|$)").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
}

impl Facet {
    fn new(range: Range<usize>, feature: FacetFeature) -> Self {
        Self {
            index: ByteSlice {
                byte_start: range.start,
                byte_end: range.end,
            },
            features: vec![feature],
        }
    }
}

/// Looks up the DID behind a handle
#[async_trait]
pub trait HandleResolver: Send + Sync {
    /// `None` when the handle cannot be resolved
    async fn resolve_handle(&self, handle: &str) -> Option<String>;
}

/// Hashtag facets; the tag value excludes the leading `#`
///
/// Trailing ASCII punctuation is not part of the tag, so "#world!" tags
/// "world".
pub fn tag_facets(text: &str) -> Vec<Facet> {
    HASHTAG
        .find_iter(text)
        .filter_map(|m| {
            let tag = m
                .as_str()
                .trim_end_matches(|c: char| c.is_ascii_punctuation());
            if tag.len() <= 1 {
                return None;
            }
            let range = m.start()..m.start() + tag.len();
            Some(Facet::new(
                range,
                FacetFeature::Tag {
                    tag: tag[1..].to_string(),
                },
            ))
        })
        .collect()
}

pub fn link_facets(text: &str) -> Vec<Facet> {
    LINK.find_iter(text)
        .map(|m| {
            Facet::new(
                m.range(),
                FacetFeature::Link {
                    uri: m.as_str().to_string(),
                },
            )
        })
        .collect()
}

/// Mentioned handles with the byte range of `@handle`
pub fn mention_candidates(text: &str) -> Vec<(Range<usize>, &str)> {
    MENTION
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let handle = caps.get(1)?.as_str().trim_end_matches('.');
            if handle.is_empty() {
                return None;
            }
            Some((whole.start()..whole.start() + 1 + handle.len(), handle))
        })
        .collect()
}

/// Every facet in `text`: tags, then links, then resolved mentions
pub async fn compute_facets<R>(text: &str, resolver: &R) -> Vec<Facet>
where
    R: HandleResolver + ?Sized,
{
    let mut facets = tag_facets(text);
    facets.extend(link_facets(text));
    for (range, handle) in mention_candidates(text) {
        if let Some(did) = resolver.resolve_handle(handle).await {
            facets.push(Facet::new(range, FacetFeature::Mention { did }));
        }
    }
    facets
}
