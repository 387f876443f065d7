//! Source identifier parsing and canonicalization.
//!
//! Raw front end input (a video URL, a direct audio URL, a playlist URL or
//! free-form search terms) is classified and resolved into a canonical
//! [`SourceRef`] before it enters the queue or cache. Downstream components
//! only ever see the canonical form.

use crate::error::AudioError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

lazy_static! {
    /// Matches watch/embed/shorts/youtu.be video URL forms and captures the
    /// 11-character video id.
    static ref VIDEO_ID_RE: Regex = Regex::new(
        r"^(?:https?://)?(?:(?:www|music)\.)?(?:youtube\.com/(?:watch\?(?:.*&)?v=|embed/|shorts/)|youtu\.be/)(?P<id>[A-Za-z0-9_-]{11}).*$"
    )
    .unwrap();

    /// Matches playlist URL forms (playlist?list=, watch?..&list=, embed
    /// videoseries and youtu.be short links carrying a list parameter).
    static ref PLAYLIST_RE: Regex = Regex::new(
        r"^(?:https?://)?(?:(?:www|music)\.)?(?:youtube\.com/(?:playlist\?list=|watch\?(?:.*&)?list=|embed/videoseries\?list=)|youtu\.be/[A-Za-z0-9_-]{11}\?(?:.*&)?list=)(?P<playlist_id>[A-Za-z0-9_-]+)(?:[&?].*)?$"
    )
    .unwrap();
}

/// How a raw input string should be resolved into canonical sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// A single video URL, canonicalized locally.
    VideoUrl,
    /// A non-YouTube http(s) URL, fetched as a direct audio download.
    DirectUrl,
    /// A playlist URL, expanded into its entries by the fetch backend.
    Playlist,
    /// Free-form search terms, resolved to the top result.
    Search,
}

/// Classify raw input. Playlist detection wins over plain video URLs so a
/// `watch?v=..&list=..` link enqueues the whole playlist.
pub fn classify(input: &str) -> InputKind {
    if PLAYLIST_RE.is_match(input) {
        InputKind::Playlist
    } else if VIDEO_ID_RE.is_match(input) {
        InputKind::VideoUrl
    } else if input.starts_with("http://") || input.starts_with("https://") {
        InputKind::DirectUrl
    } else {
        InputKind::Search
    }
}

/// Extract the 11-character video id from a video URL.
pub fn video_id(url: &str) -> Option<String> {
    VIDEO_ID_RE
        .captures(url)
        .map(|caps| caps["id"].to_string())
}

/// Backend a canonical source is fetched from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SourceKind {
    Video,
    Direct,
}

/// Canonical reference to a requested audio source.
///
/// `id` is stable and injective per source and doubles as the cache key;
/// the derived cache paths need no separate index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub url: String,
    pub kind: SourceKind,
}

impl SourceRef {
    /// Canonicalize a video URL. Fails with `InvalidSource` when no video id
    /// can be extracted.
    pub fn from_url(url: &str) -> Result<SourceRef, AudioError> {
        let id = video_id(url).ok_or_else(|| AudioError::InvalidSource(url.to_string()))?;
        Ok(SourceRef {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
            kind: SourceKind::Video,
        })
    }

    /// Build a canonical reference from a bare video id.
    pub fn from_video_id(id: &str) -> Result<SourceRef, AudioError> {
        let valid = id.len() == 11
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(AudioError::InvalidSource(id.to_string()));
        }
        Ok(SourceRef {
            id: id.to_string(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            kind: SourceKind::Video,
        })
    }

    /// Reference a direct audio URL. The id is a sanitized stem plus a
    /// stable hash of the full URL, keeping cache paths deterministic.
    pub fn direct(url: &str) -> SourceRef {
        SourceRef {
            id: direct_id(url),
            url: url.to_string(),
            kind: SourceKind::Direct,
        }
    }
}

fn direct_id(url: &str) -> String {
    // DefaultHasher::new() uses fixed keys, so the digest is stable across runs
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    url.hash(&mut hasher);
    let digest = hasher.finish();

    let stem: String = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(24)
        .collect();

    format!("{stem}-{digest:016x}")
}

/// Display metadata for a source, stored as the cache side-channel record.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackMetadata {
    pub url: String,
    pub title: String,
    pub duration_secs: u64,
}

impl TrackMetadata {
    pub fn duration_str(&self) -> String {
        fmt_duration(self.duration_secs)
    }
}

/// Render a number of seconds as (HH:)MM:SS.
pub fn fmt_duration(secs: u64) -> String {
    let mut out = String::new();
    let mut rest = secs;
    if rest >= 3600 {
        out.push_str(&format!("{:02}:", rest / 3600));
        rest %= 3600;
    }
    out.push_str(&format!("{:02}:{:02}", rest / 60, rest % 60));
    out
}
