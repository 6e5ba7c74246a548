use async_trait::async_trait;
use bytes::Bytes;
use std::{path::PathBuf, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    time::{interval, Interval, MissedTickBehavior},
};
use tracing::{debug, info};

use super::{ChannelId, RoomId, VoiceGateway, VoiceSink};
use crate::{
    audio::frames::write_frame,
    error::{PlaybackError, PlaybackResult},
};

/// Voice transport that writes each session to `<dir>/<room>-<channel>.dca`,
/// accepting one frame per `frame_interval`.
pub struct FileVoiceGateway {
    output_dir: PathBuf,
    frame_interval: Duration,
}

impl FileVoiceGateway {
    pub fn new(output_dir: impl Into<PathBuf>, frame_interval: Duration) -> Self {
        Self {
            output_dir: output_dir.into(),
            frame_interval,
        }
    }

    fn session_path(&self, room: &RoomId, channel: &ChannelId) -> PathBuf {
        let safe = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect()
        };
        self.output_dir
            .join(format!("{}-{}.dca", safe(room.as_str()), safe(channel.as_str())))
    }
}

#[async_trait]
impl VoiceGateway for FileVoiceGateway {
    async fn join_voice(
        &self,
        room: &RoomId,
        channel: &ChannelId,
    ) -> PlaybackResult<Box<dyn VoiceSink>> {
        let path = self.session_path(room, channel);
        let file = File::create(&path)
            .await
            .map_err(|e| PlaybackError::Transport(format!("{}: {}", path.display(), e)))?;

        let mut pacing = interval(self.frame_interval);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("🔊 Joined {} in room {} -> {}", channel, room, path.display());
        Ok(Box::new(FileVoiceSink {
            path,
            out: BufWriter::new(file),
            pacing,
            speaking: false,
            frames_sent: 0,
        }))
    }
}

struct FileVoiceSink {
    path: PathBuf,
    out: BufWriter<File>,
    pacing: Interval,
    speaking: bool,
    frames_sent: u64,
}

#[async_trait]
impl VoiceSink for FileVoiceSink {
    async fn set_speaking(&mut self, speaking: bool) -> PlaybackResult<()> {
        if self.speaking != speaking {
            debug!("🎙️ {} speaking={}", self.path.display(), speaking);
        }
        self.speaking = speaking;
        Ok(())
    }

    async fn send_frame(&mut self, frame: Bytes) -> PlaybackResult<()> {
        self.pacing.tick().await;

        let mut record = Vec::with_capacity(frame.len() + 2);
        write_frame(&mut record, &frame);
        self.out
            .write_all(&record)
            .await
            .map_err(|e| PlaybackError::Transport(format!("{}: {}", self.path.display(), e)))?;
        self.frames_sent += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> PlaybackResult<()> {
        self.out
            .flush()
            .await
            .map_err(|e| PlaybackError::Transport(format!("{}: {}", self.path.display(), e)))?;
        info!(
            "👋 Left voice, {} frames written to {}",
            self.frames_sent,
            self.path.display()
        );
        Ok(())
    }
}
