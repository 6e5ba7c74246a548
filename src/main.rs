use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinSet,
};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod voice;

use crate::audio::registry::RoomRegistry;
use crate::audio::transcode::{StageCommand, TranscodePipeline};
use crate::bot::{commands, MusicService};
use crate::cache::MediaCache;
use crate::config::Config;
use crate::sources::{SourceResolver, YtDlpSource};
use crate::voice::FileVoiceGateway;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("listento=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("🎵 Starting listento v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let source = Arc::new(YtDlpSource::new(config.ytdlp_path.clone()));
    let cache = Arc::new(MediaCache::open(&config.cache_dir, config.cache_max_entries).await?);
    let pipeline = Arc::new(TranscodePipeline::new(
        source.clone(),
        cache.clone(),
        StageCommand::decode_to_pcm(&config.ffmpeg_path, config.sample_rate, config.channels),
        StageCommand::encode_frames(&config.dca_path),
        config.preferred_format.clone(),
    ));
    let gateway = Arc::new(FileVoiceGateway::new(&config.output_dir, config.frame_interval));
    let rooms = RoomRegistry::new(gateway, pipeline, config.max_queue_size, config.track_gap);
    let service = Arc::new(MusicService::new(
        SourceResolver::new(source, config.resolve_timeout),
        rooms,
    ));

    info!("🚀 Ready, type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let service = service.clone();
                    tasks.spawn(async move {
                        if let Some(reply) = commands::handle_line(&service, &line).await {
                            println!("{}", reply);
                        }
                    });
                }
                Ok(None) => {
                    info!("📭 Input closed, finishing pending commands and playback");
                    break;
                }
                Err(e) => {
                    error!("Could not read command: {}", e);
                    break;
                }
            },
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = done {
                    error!("Command task failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("⚠️ Shutdown signal received, closing...");
                log_cache_stats(&cache);
                return Ok(());
            }
        }
    }

    // Input is gone; let queued work play out unless interrupted.
    let drain = async {
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                error!("Command task failed: {}", e);
            }
        }
        service.wait_until_idle(Duration::from_millis(250)).await;
    };
    tokio::select! {
        _ = drain => info!("✅ All rooms idle"),
        _ = tokio::signal::ctrl_c() => info!("⚠️ Shutdown signal received, closing..."),
    }

    log_cache_stats(&cache);
    Ok(())
}

fn log_cache_stats(cache: &MediaCache) {
    let stats = cache.stats();
    info!(
        "📊 Cache: {} hits, {} misses, {} evicted",
        stats.hits(),
        stats.misses(),
        stats.evictions()
    );
}

async fn health_check(config: &Config) -> Result<()> {
    let mut missing = Vec::new();

    for (program, flag) in [
        (config.ytdlp_path.as_str(), "--version"),
        (config.ffmpeg_path.as_str(), "-version"),
    ] {
        match async_process::Command::new(program).arg(flag).output().await {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!("{} exited with {}", program, output.status);
                missing.push(program);
            }
            Err(e) => {
                warn!("{} could not be started: {}", program, e);
                missing.push(program);
            }
        }
    }

    // dca has no version flag and exits non-zero on bare `-h`; spawning is enough.
    if let Err(e) = async_process::Command::new(&config.dca_path)
        .arg("-h")
        .output()
        .await
    {
        warn!("{} could not be started: {}", config.dca_path, e);
        missing.push(config.dca_path.as_str());
    }

    if missing.is_empty() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Missing dependencies: {}", missing.join(", "));
    }
}
