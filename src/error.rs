use std::time::Duration;
use thiserror::Error;

/// Every failure a playback command can run into.
///
/// `Display` carries the technical detail; [`PlaybackError::user_message`]
/// is the short text shown to whoever issued the command.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("metadata lookup failed: {0}")]
    Resolution(String),

    #[error("metadata lookup timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not open audio stream: {0}")]
    Acquisition(String),

    #[error("transcoding failed: {0}")]
    Encoding(String),

    #[error("voice transport error: {0}")]
    Transport(String),

    #[error("media cache error: {0}")]
    Cache(String),

    #[error("queue is full ({0} tracks)")]
    QueueFull(usize),

    #[error("room {0} was never registered")]
    UnregisteredRoom(String),
}

impl PlaybackError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::Resolution(_) | PlaybackError::Timeout(_) => {
                "No media found at that link"
            }
            PlaybackError::Acquisition(_) => "Internal Error: Could not attach media download",
            PlaybackError::Encoding(_) => "Internal Error: Transcoding failed",
            PlaybackError::Transport(_) => "Error while talking to the voice call",
            PlaybackError::Cache(_) => "Internal Error: Media cache problem",
            PlaybackError::QueueFull(_) => "The queue is full, try again later",
            PlaybackError::UnregisteredRoom(_) => "Internal Error: This room is not registered",
        }
    }

    /// Cache failures never block playback; callers log these and carry on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PlaybackError::Cache(_))
    }
}

pub type PlaybackResult<T> = Result<T, PlaybackError>;
