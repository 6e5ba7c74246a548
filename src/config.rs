use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Sample rates Opus can encode at.
const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Media cache
    pub cache_dir: PathBuf,
    pub cache_max_entries: usize,

    // Voice output (file transport)
    pub output_dir: PathBuf,
    #[serde(with = "humantime_serde_compat")]
    pub frame_interval: Duration,

    // Playback
    #[serde(with = "humantime_serde_compat")]
    pub resolve_timeout: Duration,
    #[serde(with = "humantime_serde_compat")]
    pub track_gap: Duration,
    pub max_queue_size: usize,

    // Transcoding
    pub preferred_format: String,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub dca_path: String,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            cache_dir: env_or("CACHE_DIR", "./songs").into(),
            cache_max_entries: env_or("CACHE_MAX_ENTRIES", "10")
                .parse()
                .context("CACHE_MAX_ENTRIES")?,

            output_dir: env_or("OUTPUT_DIR", "./voice-out").into(),
            frame_interval: duration_env("FRAME_INTERVAL", defaults.frame_interval)?,

            resolve_timeout: duration_env("RESOLVE_TIMEOUT", defaults.resolve_timeout)?,
            track_gap: duration_env("TRACK_GAP", defaults.track_gap)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", "100")
                .parse()
                .context("MAX_QUEUE_SIZE")?,

            preferred_format: env_or("PREFERRED_FORMAT", "251"),
            ytdlp_path: env_or("YTDLP_PATH", "yt-dlp"),
            ffmpeg_path: env_or("FFMPEG_PATH", "ffmpeg"),
            dca_path: env_or("DCA_PATH", "dca"),
            sample_rate: env_or("SAMPLE_RATE", "48000")
                .parse()
                .context("SAMPLE_RATE")?,
            channels: env_or("CHANNELS", "2").parse().context("CHANNELS")?,
        };

        config.validate()?;

        std::fs::create_dir_all(&config.cache_dir)?;
        std::fs::create_dir_all(&config.output_dir)?;

        Ok(config)
    }

    /// Sanity checks that catch a misconfigured deployment before the first
    /// command arrives.
    pub fn validate(&self) -> Result<()> {
        if self.cache_max_entries == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.frame_interval.is_zero() {
            anyhow::bail!("Frame interval must be greater than 0");
        }

        if !(1..=2).contains(&self.channels) {
            anyhow::bail!("Channels must be 1 or 2, got: {}", self.channels);
        }

        if !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
            anyhow::bail!(
                "Sample rate must be one of {:?}, got: {}",
                OPUS_SAMPLE_RATES,
                self.sample_rate
            );
        }

        Ok(())
    }

    /// Summary for the startup log.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache: {} ({} entries max)\n  \
            Playback: {} resolve timeout, {} gap, {} queue\n  \
            Transcode: {} -> {} @ {}Hz/{}ch (prefer format {})",
            self.cache_dir.display(),
            self.cache_max_entries,
            humantime::format_duration(self.resolve_timeout),
            humantime::format_duration(self.track_gap),
            self.max_queue_size,
            self.ffmpeg_path,
            self.dca_path,
            self.sample_rate,
            self.channels,
            self.preferred_format,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: "./songs".into(),
            cache_max_entries: 10,

            output_dir: "./voice-out".into(),
            frame_interval: Duration::from_millis(20), // one Opus frame

            resolve_timeout: Duration::from_secs(2),
            track_gap: Duration::from_millis(250),
            max_queue_size: 100,

            preferred_format: "251".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            dca_path: "dca".to_string(),
            sample_rate: 48000,
            channels: 2,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn duration_env(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("{} is not a duration: {}", key, val)),
        _ => Ok(default),
    }
}

/// Durations serialize as humantime strings ("2s", "250ms").
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolve_timeout, Duration::from_secs(2));
        assert_eq!(config.track_gap, Duration::from_millis(250));
    }

    #[test]
    fn rejects_zero_cache_and_odd_sample_rate() {
        let mut config = Config::default();
        config.cache_max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sample_rate = 44100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_round_trip_through_json() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["track_gap"], "250ms");
        let back: Config = serde_json::from_value(json).unwrap();
        assert_eq!(back.resolve_timeout, Duration::from_secs(2));
    }
}
