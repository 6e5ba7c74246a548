use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tracing::info;

use super::{
    player::{PlaybackState, RoomController},
    transcode::TranscodePipeline,
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    voice::{RoomId, VoiceGateway},
};

/// Room id -> controller. Rooms are created on demand and live for the
/// whole process.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<RoomController>>,
    gateway: Arc<dyn VoiceGateway>,
    pipeline: Arc<TranscodePipeline>,
    max_queue_size: usize,
    track_gap: Duration,
}

impl RoomRegistry {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        pipeline: Arc<TranscodePipeline>,
        max_queue_size: usize,
        track_gap: Duration,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            gateway,
            pipeline,
            max_queue_size,
            track_gap,
        }
    }

    /// Returns the room's controller, creating it on first registration.
    /// Registering twice keeps the existing queue.
    pub fn register(&self, id: RoomId) -> Arc<RoomController> {
        self.rooms
            .entry(id.clone())
            .or_insert_with(|| {
                info!("🏠 Registered room {}", id);
                Arc::new(RoomController::new(
                    id,
                    self.gateway.clone(),
                    self.pipeline.clone(),
                    self.max_queue_size,
                    self.track_gap,
                ))
            })
            .value()
            .clone()
    }

    pub fn get(&self, id: &RoomId) -> PlaybackResult<Arc<RoomController>> {
        self.rooms
            .get(id)
            .map(|room| room.value().clone())
            .ok_or_else(|| PlaybackError::UnregisteredRoom(id.to_string()))
    }

    pub fn pipeline(&self) -> &Arc<TranscodePipeline> {
        &self.pipeline
    }

    /// Rooms whose playback loop is still running.
    pub fn busy_rooms(&self) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|room| room.value().state() != PlaybackState::Idle)
            .map(|room| room.key().clone())
            .collect()
    }
}
