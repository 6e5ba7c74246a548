//! # Sources
//!
//! Everything between a user-supplied link and a playable [`Track`]:
//!
//! - [`MediaSource`]: the media host collaborator (metadata lookup and raw
//!   stream access). [`youtube::YtDlpSource`] is the production one.
//! - [`resolver::SourceResolver`]: the bounded-time metadata race.

pub mod resolver;
pub mod youtube;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use regex::Regex;
use std::{fmt, sync::LazyLock, time::Duration};

use crate::error::{PlaybackError, PlaybackResult};

pub use resolver::SourceResolver;
pub use youtube::YtDlpSource;

/// Raw media bytes as they come off the wire.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

static UNSAFE_ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("static regex"));

/// Stable identifier of a piece of media. Doubles as the cache file stem, so
/// anything that is not filename-safe is replaced with `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(raw: &str) -> PlaybackResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PlaybackError::Resolution(
                "media host returned an empty id".to_string(),
            ));
        }
        Ok(Self(UNSAFE_ID_CHARS.replace_all(raw, "_").into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One downloadable rendition of a media item.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFormat {
    pub format_id: String,
    pub url: String,
    pub acodec: Option<String>,
    pub abr: Option<f64>,
}

impl StreamFormat {
    pub fn has_audio(&self) -> bool {
        matches!(self.acodec.as_deref(), Some(codec) if !codec.is_empty() && codec != "none")
    }
}

/// What the media host tells us about a link.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration: Duration,
    pub formats: Vec<StreamFormat>,
}

/// A resolved, queueable unit of audio. Frames are not kept here; the
/// transcode pipeline materializes them on demand through the media cache.
#[derive(Debug, Clone)]
pub struct Track {
    source_id: SourceId,
    title: String,
    author: String,
    duration: Duration,
    url: String,
    formats: Vec<StreamFormat>,
    resolved_at: DateTime<Utc>,
}

impl Track {
    pub fn from_metadata(url: &str, metadata: Metadata) -> PlaybackResult<Self> {
        Ok(Self {
            source_id: SourceId::new(&metadata.id)?,
            title: metadata.title,
            author: metadata.author,
            duration: metadata.duration,
            url: url.to_string(),
            formats: metadata.formats,
            resolved_at: Utc::now(),
        })
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn duration(&self) -> Duration {
        self.duration
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn formats(&self) -> &[StreamFormat] {
        &self.formats
    }
    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            title: self.title.clone(),
            author: self.author.clone(),
            duration: self.duration,
        }
    }
}

/// What command handlers get to show users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    pub title: String,
    pub author: String,
    pub duration: Duration,
}

impl fmt::Display for TrackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {} ({})",
            self.title,
            self.author,
            format_duration(self.duration)
        )
    }
}

/// `m:ss`, truncating. 225.9s renders as `3:45`; hours fold into minutes.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// The media host: metadata lookup and raw stream access.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> PlaybackResult<Metadata>;

    async fn open_stream(&self, format: &StreamFormat) -> PlaybackResult<ByteStream>;
}
