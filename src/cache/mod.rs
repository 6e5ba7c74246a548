//! # Cache Module
//!
//! On-disk store of already transcoded tracks, shared by every room.
//!
//! ## Layout
//!
//! ```text
//! <CACHE_DIR>/
//!   <source id>.dca    length-prefixed Opus frames, one per cached track
//!   <source id>.json   display tags for the artifact (optional)
//! ```
//!
//! The modification time of each `.dca` file is its last-access time:
//! reading an entry through [`MediaCache::get`] bumps it, and
//! [`MediaCache::evict`] drops the oldest artifacts once there are more than
//! `CACHE_MAX_ENTRIES`.
//!
//! ## Concurrency
//!
//! Writes go to a temp file in the same directory and are renamed into place,
//! so two rooms building the same track at once end up with one intact file
//! (last writer wins). Distinct ids never touch each other's files.

pub mod media_cache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sources::Track;

pub use media_cache::MediaCache;

/// Display metadata stored next to a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    pub title: String,
    pub author: String,
    pub duration_secs: u64,
    pub url: String,
    pub resolved_at: DateTime<Utc>,
}

impl From<&Track> for TrackTags {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title().to_string(),
            author: track.author().to_string(),
            duration_secs: track.duration().as_secs(),
            url: track.url().to_string(),
            resolved_at: track.resolved_at(),
        }
    }
}
