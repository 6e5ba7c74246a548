use bytes::Bytes;
use futures::{stream, StreamExt};
use std::{process::Stdio, sync::Arc};
use tokio::{io::AsyncWriteExt, process::ChildStdin};
use tracing::{debug, info, warn};

use super::frames::{split_frames, FrameSequence};
use crate::{
    cache::{MediaCache, TrackTags},
    error::{PlaybackError, PlaybackResult},
    sources::{ByteStream, MediaSource, StreamFormat, Track},
};

/// One external transcoding step: raw bytes on stdin, result on stdout.
#[derive(Debug, Clone)]
pub struct StageCommand {
    program: String,
    args: Vec<String>,
}

enum FeedError {
    Source(std::io::Error),
    Stdin(std::io::Error),
}

impl StageCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Stage A: any container in, interleaved s16le PCM out.
    pub fn decode_to_pcm(ffmpeg: &str, sample_rate: u32, channels: u8) -> Self {
        let rate = sample_rate.to_string();
        let channels = channels.to_string();
        Self::new(
            ffmpeg,
            &[
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "s16le",
                "-ar",
                rate.as_str(),
                "-ac",
                channels.as_str(),
                "pipe:1",
            ],
        )
    }

    /// Stage B: PCM in, length-prefixed Opus frames out.
    pub fn encode_frames(dca: &str) -> Self {
        Self::new(dca, &[])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the stage to completion, feeding `input` to stdin while stdout
    /// is captured in full.
    pub async fn run(&self, input: ByteStream) -> PlaybackResult<Bytes> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PlaybackError::Encoding(format!("could not start {}: {}", self.program, e))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            PlaybackError::Encoding(format!("{} stdin was not captured", self.program))
        })?;

        let (fed, output) = tokio::join!(feed_stdin(stdin, input), child.wait_with_output());

        if let Err(FeedError::Source(e)) = &fed {
            return Err(PlaybackError::Acquisition(format!(
                "source stream failed mid-download: {}",
                e
            )));
        }

        let output = output
            .map_err(|e| PlaybackError::Encoding(format!("{} I/O error: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlaybackError::Encoding(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        // A stage that exits cleanly without draining stdin is fine.
        if let Err(FeedError::Stdin(e)) = fed {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(PlaybackError::Encoding(format!(
                    "writing to {} failed: {}",
                    self.program, e
                )));
            }
        }

        Ok(Bytes::from(output.stdout))
    }
}

async fn feed_stdin(mut stdin: ChildStdin, mut input: ByteStream) -> Result<(), FeedError> {
    while let Some(chunk) = input.next().await {
        let chunk = chunk.map_err(FeedError::Source)?;
        stdin.write_all(&chunk).await.map_err(FeedError::Stdin)?;
    }
    // Dropping stdin closes the pipe.
    Ok(())
}

fn buffered(data: Bytes) -> ByteStream {
    stream::once(async move { Ok(data) }).boxed()
}

/// Picks the preferred audio format, or any audio-capable one.
pub fn select_format<'a>(
    formats: &'a [StreamFormat],
    preferred: &str,
) -> PlaybackResult<&'a StreamFormat> {
    formats
        .iter()
        .find(|f| f.has_audio() && f.format_id == preferred)
        .or_else(|| formats.iter().find(|f| f.has_audio()))
        .ok_or_else(|| PlaybackError::Acquisition("no audio stream available".to_string()))
}

/// Acquire-or-build for a track's frames: cache first, otherwise download,
/// run both stages, split, persist and evict.
pub struct TranscodePipeline {
    source: Arc<dyn MediaSource>,
    cache: Arc<MediaCache>,
    decode: StageCommand,
    encode: StageCommand,
    preferred_format: String,
}

impl TranscodePipeline {
    pub fn new(
        source: Arc<dyn MediaSource>,
        cache: Arc<MediaCache>,
        decode: StageCommand,
        encode: StageCommand,
        preferred_format: impl Into<String>,
    ) -> Self {
        Self {
            source,
            cache,
            decode,
            encode,
            preferred_format: preferred_format.into(),
        }
    }

    pub async fn materialize(&self, track: &Track) -> PlaybackResult<FrameSequence> {
        let id = track.source_id();

        if let Some(data) = self.cache.get(id).await {
            match split_frames(data) {
                Ok(frames) => return Ok(frames),
                Err(e) => warn!("Cached artifact for {} is unreadable, rebuilding: {}", id, e),
            }
        }

        let encoded = self.build(track).await?;
        let frames = split_frames(encoded.clone())?;
        info!("🎼 Transcoded {} into {} frames", track.title(), frames.len());

        self.persist(track, encoded).await;
        Ok(frames)
    }

    async fn build(&self, track: &Track) -> PlaybackResult<Bytes> {
        let format = select_format(track.formats(), &self.preferred_format)?;
        let stream = self.source.open_stream(format).await?;

        let pcm = self.decode.run(stream).await?;
        debug!("{} produced {} bytes of PCM", self.decode.program(), pcm.len());

        self.encode.run(buffered(pcm)).await
    }

    async fn persist(&self, track: &Track, encoded: Bytes) {
        let id = track.source_id();

        if let Err(e) = self.cache.store(id, encoded).await {
            warn!("Non-fatal error occurred while caching {}: {}", id, e);
            return;
        }
        if let Err(e) = self.cache.write_tags(id, &TrackTags::from(track)).await {
            warn!("Non-fatal error occurred while writing tags for {}: {}", id, e);
        }
        if let Err(e) = self.cache.evict().await {
            warn!("Non-fatal error occurred while removing old media: {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::frames::write_frame;
    use crate::sources::{test_support, MockMediaSource};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn encoded(frames: &[&str]) -> Bytes {
        let mut out = Vec::new();
        for frame in frames {
            write_frame(&mut out, frame.as_bytes());
        }
        Bytes::from(out)
    }

    fn serving(data: Bytes) -> MockMediaSource {
        let mut source = MockMediaSource::new();
        source
            .expect_open_stream()
            .returning(move |_| Ok(buffered(data.clone())));
        source
    }

    fn passthrough(source: MockMediaSource, cache: Arc<MediaCache>) -> TranscodePipeline {
        TranscodePipeline::new(
            Arc::new(source),
            cache,
            StageCommand::new("cat", &[]),
            StageCommand::new("cat", &[]),
            "251",
        )
    }

    #[tokio::test]
    async fn builds_frames_and_caches_artifact() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 5).await.unwrap());
        let pipeline = passthrough(serving(encoded(&["one", "two"])), cache.clone());
        let track = test_support::track("song1", "Song One", 200);

        let frames = pipeline.materialize(&track).await.unwrap();

        assert_eq!(frames, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert!(dir.path().join("song1.dca").exists());
        assert!(dir.path().join("song1.json").exists());
    }

    #[tokio::test]
    async fn second_materialize_is_cache_hit_without_subprocess() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 5).await.unwrap());
        let track = test_support::track("song1", "Song One", 200);

        let first = passthrough(serving(encoded(&["a", "b", "c"])), cache.clone());
        let built = first.materialize(&track).await.unwrap();

        // Neither the source nor the stages may be touched again.
        let mut untouched = MockMediaSource::new();
        untouched.expect_open_stream().times(0);
        let second = TranscodePipeline::new(
            Arc::new(untouched),
            cache.clone(),
            StageCommand::new("/nonexistent/ffmpeg", &[]),
            StageCommand::new("/nonexistent/dca", &[]),
            "251",
        );

        assert_eq!(second.materialize(&track).await.unwrap(), built);
        assert_eq!(cache.stats().hits(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_builds_leave_one_intact_artifact() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 5).await.unwrap());
        let names: Vec<String> = (0..2000).map(|i| format!("frame-{}", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let pipeline = Arc::new(passthrough(serving(encoded(&names)), cache.clone()));
        let track = test_support::track("same", "Same Song", 120);

        let builds: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = pipeline.clone();
                let track = track.clone();
                tokio::spawn(async move { pipeline.materialize(&track).await })
            })
            .collect();
        for build in builds {
            assert_eq!(build.await.unwrap().unwrap().len(), 2000);
        }

        // Whichever rename won, the file on disk must read back whole.
        let mut untouched = MockMediaSource::new();
        untouched.expect_open_stream().times(0);
        let reread = TranscodePipeline::new(
            Arc::new(untouched),
            cache,
            StageCommand::new("/nonexistent/ffmpeg", &[]),
            StageCommand::new("/nonexistent/dca", &[]),
            "251",
        );
        let frames = reread.materialize(&track).await.unwrap();
        assert_eq!(frames.len(), 2000);
        assert_eq!(frames[0], Bytes::from_static(b"frame-0"));
        assert_eq!(frames[1999], Bytes::from_static(b"frame-1999"));

        let mut files: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, vec!["same.dca", "same.json"]);
    }

    #[tokio::test]
    async fn failing_stage_is_encoding_error_and_caches_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 5).await.unwrap());
        let pipeline = TranscodePipeline::new(
            Arc::new(serving(encoded(&["x"]))),
            cache,
            StageCommand::new("cat", &[]),
            StageCommand::new("false", &[]),
            "251",
        );

        let err = pipeline
            .materialize(&test_support::track("bad", "Bad", 10))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaybackError::Encoding(_)));
        assert!(!dir.path().join("bad.dca").exists());
    }

    #[tokio::test]
    async fn truncated_encoder_output_is_encoding_error() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 5).await.unwrap());
        let mut data = encoded(&["complete", "partial"]).to_vec();
        data.truncate(data.len() - 2);
        let pipeline = passthrough(serving(Bytes::from(data)), cache);

        let err = pipeline
            .materialize(&test_support::track("cut", "Cut", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Encoding(_)));
        assert!(!dir.path().join("cut.dca").exists());
    }

    #[tokio::test]
    async fn broken_source_stream_is_acquisition_error() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 5).await.unwrap());
        let mut source = MockMediaSource::new();
        source.expect_open_stream().returning(|_| {
            Ok(stream::iter(vec![
                Ok(Bytes::from_static(b"\x01\x00")),
                Err(std::io::Error::other("connection reset")),
            ])
            .boxed())
        });
        let pipeline = passthrough(source, cache);

        let err = pipeline
            .materialize(&test_support::track("reset", "Reset", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Acquisition(_)));
    }

    #[tokio::test]
    async fn building_past_capacity_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(MediaCache::open(dir.path(), 1).await.unwrap());
        let pipeline = passthrough(serving(encoded(&["x"])), cache.clone());

        pipeline.materialize(&test_support::track("first", "First", 1)).await.unwrap();
        // Make sure the two artifacts get distinct timestamps.
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
        std::fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("first.dca"))
            .unwrap()
            .set_modified(old)
            .unwrap();
        pipeline.materialize(&test_support::track("second", "Second", 1)).await.unwrap();

        assert!(!dir.path().join("first.dca").exists());
        assert!(dir.path().join("second.dca").exists());
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn prefers_configured_format_then_any_audio() {
        let format = |id: &str, acodec: &str| StreamFormat {
            format_id: id.to_string(),
            url: format!("https://v/{}", id),
            acodec: Some(acodec.to_string()),
            abr: None,
        };

        let formats = vec![format("160", "none"), format("140", "mp4a"), format("251", "opus")];
        assert_eq!(select_format(&formats, "251").unwrap().format_id, "251");
        assert_eq!(select_format(&formats, "999").unwrap().format_id, "140");

        // The preferred id only counts if it actually carries audio.
        assert_eq!(select_format(&formats, "160").unwrap().format_id, "140");

        let silent = vec![format("160", "none")];
        assert!(matches!(
            select_format(&silent, "251"),
            Err(PlaybackError::Acquisition(_))
        ));
    }
}
