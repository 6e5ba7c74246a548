//! # Audio Module
//!
//! Per-room playback: everything between a resolved [`Track`] and the frames
//! that reach a voice channel.
//!
//! ## Architecture
//!
//! ### [`registry`] - Room Registry
//! - One [`player::RoomController`] per room, created on first use
//! - Unknown rooms are reported, never created implicitly
//!
//! ### [`player`] - Room Controller
//! - Owns the room's [`queue::TrackQueue`] and its playback state
//! - Starts at most one playback loop per room
//! - Skips abandon the current track only
//!
//! ### [`transcode`] - Transcode Pipeline
//! - Cache lookup, otherwise download -> `ffmpeg` (PCM) -> `dca` (Opus frames)
//! - Persists and evicts through [`crate::cache::MediaCache`]
//!
//! ### [`frames`] - Frame Codec
//! - `u16` little-endian length prefix per Opus frame
//!
//! ## Playback States
//!
//! ```text
//! Idle --enqueue--> Joining --joined--> Playing <--> Draining --queue empty--> Idle
//! ```
//!
//! [`Track`]: crate::sources::Track

pub mod frames;
pub mod player;
pub mod queue;
pub mod registry;
pub mod transcode;
