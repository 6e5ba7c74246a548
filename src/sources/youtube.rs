use async_process::Command;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{ByteStream, MediaSource, Metadata, StreamFormat};
use crate::error::{PlaybackError, PlaybackResult};

/// Media host backed by the `yt-dlp` CLI for metadata and plain HTTP for the
/// stream itself.
pub struct YtDlpSource {
    ytdlp_path: String,
    http: reqwest::Client,
}

/// Subset of `yt-dlp --dump-json` output we care about.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    formats: Option<Vec<Format>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    format_id: String,
    url: String,
    acodec: Option<String>,
    abr: Option<f64>,
}

impl YtDlpSource {
    pub fn new(ytdlp_path: impl Into<String>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            http: reqwest::Client::new(),
        }
    }

    fn parse_info(json: &str) -> PlaybackResult<Metadata> {
        let info: YtDlpInfo = serde_json::from_str(json)
            .map_err(|e| PlaybackError::Resolution(format!("unreadable yt-dlp output: {}", e)))?;

        Ok(Metadata {
            id: info.id,
            title: info.title,
            author: info.uploader.unwrap_or_else(|| "Unknown".to_string()),
            duration: info
                .duration
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or_default(),
            formats: info
                .formats
                .unwrap_or_default()
                .into_iter()
                .map(|f| StreamFormat {
                    format_id: f.format_id,
                    url: f.url,
                    acodec: f.acodec,
                    abr: f.abr,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn fetch_metadata(&self, url: &str) -> PlaybackResult<Metadata> {
        debug!("📊 Fetching metadata for {}", url);
        let output = Command::new(&self.ytdlp_path)
            .args(["--no-playlist", "--dump-json", "--no-warnings", url])
            .output()
            .await
            .map_err(|e| PlaybackError::Resolution(format!("could not run yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlaybackError::Resolution(format!(
                "yt-dlp error: {}",
                stderr.trim()
            )));
        }

        Self::parse_info(&String::from_utf8_lossy(&output.stdout))
    }

    async fn open_stream(&self, format: &StreamFormat) -> PlaybackResult<ByteStream> {
        info!("⬇️ Opening format {} for download", format.format_id);

        let response = self
            .http
            .get(&format.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PlaybackError::Acquisition(e.to_string()))?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }
}
