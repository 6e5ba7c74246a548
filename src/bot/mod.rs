//! # Bot Module
//!
//! Command-facing side of the player.
//!
//! [`MusicService`] is what every command handler talks to: it owns the
//! [`SourceResolver`], the shared transcode pipeline (through the registry)
//! and the [`RoomRegistry`]. [`commands`] turns console lines into
//! calls on it and renders the replies.

pub mod commands;

use std::time::Duration;
use tracing::{debug, info};

use crate::{
    audio::{
        player::{PlaybackState, SkipOutcome},
        registry::RoomRegistry,
    },
    error::PlaybackResult,
    sources::{SourceResolver, TrackSummary},
    voice::{ChannelId, RoomId},
};

pub struct MusicService {
    resolver: SourceResolver,
    rooms: RoomRegistry,
}

impl MusicService {
    pub fn new(resolver: SourceResolver, rooms: RoomRegistry) -> Self {
        Self { resolver, rooms }
    }

    pub fn register(&self, room: RoomId) {
        self.rooms.register(room);
    }

    /// Resolves `url`, makes sure its frames are cached, then queues it in
    /// `room`. Playback starts in `channel` if the room was idle.
    pub async fn resolve_and_enqueue(
        &self,
        room: &RoomId,
        channel: ChannelId,
        url: &str,
    ) -> PlaybackResult<TrackSummary> {
        let controller = self.rooms.get(room)?;

        let track = self.resolver.resolve(url).await?;
        self.rooms.pipeline().materialize(&track).await?;

        let summary = controller.enqueue(channel, track)?;
        info!("📥 Queued {} in room {}", summary, room);
        Ok(summary)
    }

    pub fn list_queue(&self, room: &RoomId) -> PlaybackResult<Vec<TrackSummary>> {
        Ok(self.rooms.get(room)?.list_queue())
    }

    pub fn skip(&self, room: &RoomId) -> PlaybackResult<SkipOutcome> {
        Ok(self.rooms.get(room)?.skip())
    }

    pub fn playback_state(&self, room: &RoomId) -> PlaybackResult<PlaybackState> {
        Ok(self.rooms.get(room)?.state())
    }

    pub fn now_playing(&self, room: &RoomId) -> PlaybackResult<Option<TrackSummary>> {
        Ok(self.rooms.get(room)?.now_playing())
    }

    pub fn last_error(&self, room: &RoomId) -> PlaybackResult<Option<String>> {
        Ok(self.rooms.get(room)?.last_error())
    }

    /// Resolves once no room has a playback loop running, checking every
    /// `poll`.
    pub async fn wait_until_idle(&self, poll: Duration) {
        let mut announced = false;
        loop {
            let busy = self.rooms.busy_rooms();
            if busy.is_empty() {
                return;
            }
            if !announced {
                debug!("⏳ Waiting for {} room(s) to finish playing", busy.len());
                announced = true;
            }
            tokio::time::sleep(poll).await;
        }
    }
}
