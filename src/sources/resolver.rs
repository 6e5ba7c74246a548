use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::{MediaSource, Track};
use crate::error::{PlaybackError, PlaybackResult};

/// Turns links into tracks within a fixed deadline.
pub struct SourceResolver {
    source: Arc<dyn MediaSource>,
    deadline: Duration,
}

impl SourceResolver {
    pub fn new(source: Arc<dyn MediaSource>, deadline: Duration) -> Self {
        Self { source, deadline }
    }

    /// Races the metadata lookup against the deadline. The lookup runs in its
    /// own task so a timeout leaves it running; whatever it produces after
    /// that is dropped.
    pub async fn resolve(&self, url: &str) -> PlaybackResult<Track> {
        let source = self.source.clone();
        let owned_url = url.to_string();
        let lookup = tokio::spawn(async move { source.fetch_metadata(&owned_url).await });

        match tokio::time::timeout(self.deadline, lookup).await {
            Ok(Ok(Ok(metadata))) => {
                debug!("🔍 Resolved {} -> {}", url, metadata.id);
                Track::from_metadata(url, metadata)
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(PlaybackError::Resolution(format!(
                "metadata lookup task failed: {}",
                join_error
            ))),
            Err(_) => {
                warn!("⏰ Metadata lookup for {} exceeded {:?}", url, self.deadline);
                Err(PlaybackError::Timeout(self.deadline))
            }
        }
    }
}
