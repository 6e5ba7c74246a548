use anyhow::{bail, Result};
use std::time::Duration;
use tracing::{error, info, warn};

use super::MusicService;
use crate::{
    error::PlaybackError,
    sources::format_duration,
    voice::{ChannelId, RoomId},
};

const HELP: &str = "\
Commands:
  join <room>                    register a room
  play <room> <channel> <url>    add a song to the room's queue and start playing
  queue <room>                   show pending songs
  skip <room>                    skip the current song
  status <room>                  show what the room is doing
  ping [message]                 bot will respond with pong
  help                           this text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { room: RoomId },
    Play { room: RoomId, channel: ChannelId, url: String },
    Queue { room: RoomId },
    Skip { room: RoomId },
    Status { room: RoomId },
    Ping { message: Option<String> },
    Help,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            bail!("Empty command, try `help`");
        };
        let args: Vec<&str> = words.collect();

        let command = match (name.to_lowercase().as_str(), args.as_slice()) {
            ("join", [room]) => Command::Join { room: RoomId::new(*room) },
            ("play" | "playsong", [room, channel, url]) => Command::Play {
                room: RoomId::new(*room),
                channel: ChannelId::new(*channel),
                url: url.to_string(),
            },
            ("queue", [room]) => Command::Queue { room: RoomId::new(*room) },
            ("skip", [room]) => Command::Skip { room: RoomId::new(*room) },
            ("status", [room]) => Command::Status { room: RoomId::new(*room) },
            ("ping", []) => Command::Ping { message: None },
            ("ping", message) => Command::Ping {
                message: Some(message.join(" ")),
            },
            ("help", _) => Command::Help,
            ("join" | "queue" | "skip" | "status", _) => bail!("Usage: {} <room>", name),
            ("play" | "playsong", _) => bail!("Usage: play <room> <channel> <url>"),
            _ => bail!("Unknown command `{}`, try `help`", name),
        };
        Ok(command)
    }
}

/// Runs one console line and returns the reply. Blank lines get no reply.
pub async fn handle_line(service: &MusicService, line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }

    let reply = match Command::parse(line) {
        Ok(command) => {
            info!("📝 Command: {}", line.trim());
            execute(service, command).await
        }
        Err(usage) => format!("❌ {}", usage),
    };
    Some(reply)
}

pub async fn execute(service: &MusicService, command: Command) -> String {
    match command {
        Command::Join { room } => {
            service.register(room.clone());
            format!("Joined room {}", room)
        }
        Command::Play { room, channel, url } => {
            match service.resolve_and_enqueue(&room, channel, &url).await {
                Ok(summary) => format!("Added {} to the queue", summary),
                Err(e) => report(&room, e),
            }
        }
        Command::Queue { room } => match service.list_queue(&room) {
            Ok(queue) if queue.is_empty() => "The queue is empty".to_string(),
            Ok(queue) => {
                let total: Duration = queue.iter().map(|track| track.duration).sum();
                let mut reply = format!("📜 {} in queue ({} total)\n", queue.len(), format_duration(total));
                for (position, track) in queue.iter().enumerate() {
                    reply.push_str(&format!("{}. {}\n", position + 1, track));
                }
                reply.trim_end().to_string()
            }
            Err(e) => report(&room, e),
        },
        Command::Skip { room } => match service.skip(&room) {
            Ok(outcome) if outcome.skipped => "⏭️ Skipped".to_string(),
            Ok(_) => "Nothing is playing".to_string(),
            Err(e) => report(&room, e),
        },
        Command::Status { room } => {
            let status = service
                .playback_state(&room)
                .and_then(|state| Ok((state, service.now_playing(&room)?)));
            let mut reply = match status {
                Ok((state, Some(track))) => format!("{:?}: ▶️ {}", state, track),
                Ok((state, None)) => format!("{:?}", state),
                Err(e) => return report(&room, e),
            };
            if let Ok(Some(failure)) = service.last_error(&room) {
                reply.push_str(&format!("\n⚠️ Last session ended early: {}", failure));
            }
            reply
        }
        Command::Ping { message } => match message {
            Some(message) => format!("pong {}", message),
            None => "pong".to_string(),
        },
        Command::Help => HELP.to_string(),
    }
}

/// Short message for the user, technical detail in italics below it.
fn report(room: &RoomId, e: PlaybackError) -> String {
    match &e {
        PlaybackError::UnregisteredRoom(_) => {
            error!("Command for room {} that was never registered", room)
        }
        e if e.is_fatal() => warn!("Command in room {} failed: {}", room, e),
        e => info!("Command in room {} hit a non-fatal error: {}", room, e),
    }
    format!("{}\n*{}*", e.user_message(), e)
}
