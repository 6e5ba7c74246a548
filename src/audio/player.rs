use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{queue::TrackQueue, transcode::TranscodePipeline};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::{Track, TrackSummary},
    voice::{ChannelId, RoomId, VoiceGateway, VoiceSink},
};

/// Where a room's playback loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No loop running.
    Idle,
    /// Loop started, voice connection in progress.
    Joining,
    /// Streaming the track taken from the queue head.
    Playing,
    /// Between tracks, or hanging up.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipOutcome {
    pub skipped: bool,
}

enum TrackEnd {
    Finished,
    Skipped,
}

struct RoomState {
    queue: TrackQueue,
    state: PlaybackState,
    /// Token of the track being streamed; `None` whenever nothing is.
    skip: Option<CancellationToken>,
    now_playing: Option<TrackSummary>,
    /// Why the most recent session ended early, if it did.
    last_error: Option<String>,
}

/// Owns one room's queue and drives its playback loop.
///
/// All state transitions happen under `inner`, so "start a loop if idle" is
/// atomic with respect to concurrent enqueues and the loop's own
/// "queue empty, go idle" step.
pub struct RoomController {
    id: RoomId,
    inner: Mutex<RoomState>,
    gateway: Arc<dyn VoiceGateway>,
    pipeline: Arc<TranscodePipeline>,
    track_gap: Duration,
}

impl RoomController {
    pub fn new(
        id: RoomId,
        gateway: Arc<dyn VoiceGateway>,
        pipeline: Arc<TranscodePipeline>,
        max_queue_size: usize,
        track_gap: Duration,
    ) -> Self {
        Self {
            id,
            inner: Mutex::new(RoomState {
                queue: TrackQueue::new(max_queue_size),
                state: PlaybackState::Idle,
                skip: None,
                now_playing: None,
                last_error: None,
            }),
            gateway,
            pipeline,
            track_gap,
        }
    }

    /// Appends `track` and starts a playback loop in `channel` unless one is
    /// already running for this room.
    pub fn enqueue(self: &Arc<Self>, channel: ChannelId, track: Track) -> PlaybackResult<TrackSummary> {
        let summary = track.summary();

        let start_loop = {
            let mut inner = self.inner.lock();
            inner.queue.add_track(track)?;
            debug!("{} pending in room {}", inner.queue.len(), self.id);
            if inner.state == PlaybackState::Idle {
                inner.state = PlaybackState::Joining;
                inner.last_error = None;
                true
            } else {
                false
            }
        };

        if start_loop {
            debug!("Starting playback loop for room {}", self.id);
            let room = Arc::clone(self);
            tokio::spawn(async move { room.run(channel).await });
        }

        Ok(summary)
    }

    /// Pending tracks, head first. The track being streamed is not included.
    pub fn list_queue(&self) -> Vec<TrackSummary> {
        self.inner.lock().queue.summaries()
    }

    /// Abandons the track being streamed, if any. Never touches the queue.
    pub fn skip(&self) -> SkipOutcome {
        let inner = self.inner.lock();
        match (&inner.skip, inner.state) {
            (Some(token), PlaybackState::Playing) => {
                token.cancel();
                info!("⏭️ Skip requested in room {}", self.id);
                SkipOutcome { skipped: true }
            }
            _ => SkipOutcome { skipped: false },
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn now_playing(&self) -> Option<TrackSummary> {
        self.inner.lock().now_playing.clone()
    }

    /// Error that ended the last session, kept until the next one starts.
    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    async fn run(self: Arc<Self>, channel: ChannelId) {
        loop {
            match self.gateway.join_voice(&self.id, &channel).await {
                Ok(mut sink) => {
                    if let Err(e) = self.stream_queue(sink.as_mut()).await {
                        error!("💥 Playback in room {} stopped: {}", self.id, e);
                        self.abort_session(&e);
                    }
                    self.hang_up(sink.as_mut()).await;
                }
                Err(e) => {
                    error!("❌ Could not join {} in room {}: {}", channel, self.id, e);
                    self.abort_session(&e);
                }
            }

            // Tracks enqueued while we were hanging up get a fresh session.
            let finished = {
                let mut inner = self.inner.lock();
                inner.skip = None;
                inner.now_playing = None;
                if inner.queue.is_empty() {
                    inner.state = PlaybackState::Idle;
                    true
                } else {
                    inner.state = PlaybackState::Joining;
                    false
                }
            };
            if finished {
                debug!("Room {} is idle", self.id);
                return;
            }
        }
    }

    /// Plays queued tracks until the queue runs dry. Only transport errors
    /// end the session early.
    async fn stream_queue(&self, sink: &mut dyn VoiceSink) -> PlaybackResult<()> {
        sink.set_speaking(true).await?;

        loop {
            let next = {
                let mut inner = self.inner.lock();
                match inner.queue.next_track() {
                    Some(track) => {
                        let token = CancellationToken::new();
                        inner.skip = Some(token.clone());
                        inner.now_playing = Some(track.summary());
                        inner.state = PlaybackState::Playing;
                        Some((track, token))
                    }
                    None => {
                        inner.state = PlaybackState::Draining;
                        None
                    }
                }
            };
            let Some((track, skip)) = next else {
                return Ok(());
            };

            let result = self.play_track(&track, &skip, sink).await;

            {
                let mut inner = self.inner.lock();
                inner.skip = None;
                inner.now_playing = None;
                inner.state = PlaybackState::Draining;
            }

            match result {
                Ok(TrackEnd::Finished) => info!("✅ Finished {} in room {}", track.title(), self.id),
                Ok(TrackEnd::Skipped) => info!("⏭️ Skipped {} in room {}", track.title(), self.id),
                Err(e @ PlaybackError::Transport(_)) => return Err(e),
                Err(e) => warn!("⚠️ Dropping {} in room {}: {}", track.title(), self.id, e),
            }

            tokio::time::sleep(self.track_gap).await;
        }
    }

    async fn play_track(
        &self,
        track: &Track,
        skip: &CancellationToken,
        sink: &mut dyn VoiceSink,
    ) -> PlaybackResult<TrackEnd> {
        let frames = tokio::select! {
            biased;
            _ = skip.cancelled() => return Ok(TrackEnd::Skipped),
            frames = self.pipeline.materialize(track) => frames?,
        };

        info!(
            "🎵 Now playing in room {}: {} ({} frames)",
            self.id,
            track.title(),
            frames.len()
        );

        for frame in frames {
            tokio::select! {
                biased;
                _ = skip.cancelled() => return Ok(TrackEnd::Skipped),
                sent = sink.send_frame(frame) => sent?,
            }
        }

        Ok(TrackEnd::Finished)
    }

    async fn hang_up(&self, sink: &mut dyn VoiceSink) {
        if let Err(e) = sink.set_speaking(false).await {
            warn!("Could not clear speaking flag in room {}: {}", self.id, e);
        }
        if let Err(e) = sink.disconnect().await {
            warn!("Could not disconnect cleanly from room {}: {}", self.id, e);
        }
    }

    fn abort_session(&self, e: &PlaybackError) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.last_error = Some(e.to_string());
    }
}
