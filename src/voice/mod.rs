//! # Voice Module
//!
//! The boundary to the voice-call transport. Playback only ever talks to a
//! [`VoiceGateway`] (to join a channel) and the [`VoiceSink`] it hands back
//! (to stream frames into the call).
//!
//! [`file::FileVoiceGateway`] is the transport shipped with the binary: it
//! records every frame a room sends into a `.dca` file at real-time pace.

pub mod file;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use crate::error::PlaybackResult;

pub use file::FileVoiceGateway;

/// Opaque identifier of a room (guild, server, group...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

/// Opaque identifier of a voice channel inside a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(RoomId);
string_id!(ChannelId);

/// Joins voice channels.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join_voice(
        &self,
        room: &RoomId,
        channel: &ChannelId,
    ) -> PlaybackResult<Box<dyn VoiceSink>>;
}

/// A live connection to one voice channel. `send_frame` applies
/// backpressure: it returns once the transport has accepted the frame.
#[async_trait]
pub trait VoiceSink: Send {
    async fn set_speaking(&mut self, speaking: bool) -> PlaybackResult<()>;

    async fn send_frame(&mut self, frame: Bytes) -> PlaybackResult<()>;

    async fn disconnect(&mut self) -> PlaybackResult<()>;
}
