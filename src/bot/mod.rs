//! # Bot Module
//!
//! Local command layer. [`ConsoleBot`] reads one command per line from any
//! async reader, in the form `<chat_id> <user_id> /command args...`, hands
//! it to the [`PlaybackController`] and writes the reply back. It stands in
//! for the chat transport, which lives outside this crate.
//!
//! ## Example
//!
//! ```text
//! -1001 42 /play never gonna give you up
//! [-1001] 🎵 Reproduciendo: **Never Gonna Give You Up** [3:33]
//! -1001 42 /queue
//! [-1001] 📋 Cola (1 canciones, 3:33) ...
//! ```

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod commands;

pub use commands::{Command, ParseError};

use crate::{
    audio::player::PlaybackController,
    error::PlaybackError,
    permissions::StaticPrivileges,
    types::{ChatId, UserId},
    ui::messages,
};

pub struct ConsoleBot {
    controller: PlaybackController,
    owners: Arc<StaticPrivileges>,
}

impl ConsoleBot {
    pub fn new(controller: PlaybackController, owners: Arc<StaticPrivileges>) -> Self {
        Self { controller, owners }
    }

    /// Reads commands until EOF or `shutdown`, writing one reply per line.
    pub async fn run<R, W>(&self, input: R, mut output: W, shutdown: CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        info!("⌨️ Consola lista: <chat_id> <user_id> /comando");

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("Fin de la entrada de la consola");
                break;
            };

            if let Some(reply) = self.handle_line(&line).await {
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }

        Ok(())
    }

    /// Returns `None` for blank lines and `#` comments.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut parts = line.splitn(3, char::is_whitespace);
        let chat = parts.next().and_then(|raw| raw.parse::<ChatId>().ok());
        let user = parts.next().and_then(|raw| raw.parse::<UserId>().ok());
        let (Some(chat), Some(user), Some(text)) = (chat, user, parts.next()) else {
            return Some("⚠️ Formato: <chat_id> <user_id> /comando [argumentos]".to_string());
        };

        let reply = match Command::parse(text) {
            Ok(command) => self.dispatch(chat, user, command).await,
            Err(e) => format!("⚠️ {}", e),
        };
        Some(format!("[{}] {}", chat, reply))
    }

    pub async fn dispatch(&self, chat: ChatId, user: UserId, command: Command) -> String {
        debug!("Comando {:?} de {} en chat {}", command, user, chat);

        if command.is_owner_only() && !self.owners.is_sudo(user) {
            warn!("🚫 {} intentó un comando de operador en chat {}", user, chat);
            return messages::error(&PlaybackError::NotPrivileged);
        }

        let c = &self.controller;
        match command {
            Command::Play { query, video, force } => {
                match c.play_query(chat, user, &query, video, force).await {
                    Ok(outcome) => messages::play_outcome(&outcome),
                    Err(e) => messages::error(&e),
                }
            }
            Command::Skip => match c.vote_skip(chat, user).await {
                Ok(outcome) => messages::skip_outcome(&outcome),
                Err(e) => messages::error(&e),
            },
            Command::Stop => {
                if c.stop(chat).await {
                    "⏹️ Reproducción detenida".to_string()
                } else {
                    "ℹ️ No había nada que detener".to_string()
                }
            }
            Command::Pause => match c.pause(chat) {
                Ok(()) => "⏸️ Pausado".to_string(),
                Err(e) => messages::error(&e),
            },
            Command::Resume => match c.resume(chat) {
                Ok(()) => "▶️ Reanudado".to_string(),
                Err(e) => messages::error(&e),
            },
            Command::Queue => messages::queue_listing(&c.get_queue(chat), c.queue_duration(chat)),
            Command::NowPlaying => match c.current_track(chat) {
                Some(track) => messages::now_playing(&track, c.state(chat)),
                None => messages::error(&PlaybackError::NothingPlaying),
            },
            Command::Shuffle => match c.shuffle(chat) {
                0 => "ℹ️ No hay suficientes canciones pendientes para mezclar".to_string(),
                n => format!("🔀 {} canciones mezcladas", n),
            },
            Command::Remove { position } => match c.remove(chat, position) {
                Ok(track) => format!("🗑️ Quitada: **{}**", track.title),
                Err(e) => messages::error(&e),
            },
            Command::Clear => match c.clear_pending(chat, user).await {
                Ok(removed) => format!("🗑️ {} canciones pendientes quitadas", removed),
                Err(e) => messages::error(&e),
            },
            Command::Replay => match c.replay(chat).await {
                Ok(track) => format!("🔁 Reiniciando: **{}**", track.title),
                Err(e) => messages::error(&e),
            },
            Command::Loop { mode } => {
                match c.update_setting(chat, user, "loop_mode", &mode.to_string()).await {
                    Ok(_) => format!("🔁 Repetición: {}", mode),
                    Err(e) => messages::error(&e),
                }
            }
            Command::Autoplay { enabled } => {
                let raw = if enabled { "on" } else { "off" };
                match c.update_setting(chat, user, "autoplay", raw).await {
                    Ok(_) => format!("📻 Autoplay: {}", raw),
                    Err(e) => messages::error(&e),
                }
            }
            Command::Settings { change: None } => {
                messages::settings_overview(&c.chat_settings(chat).await)
            }
            Command::Settings {
                change: Some((key, value)),
            } => match c.update_setting(chat, user, &key, &value).await {
                Ok(settings) => messages::settings_overview(&settings),
                Err(e) => messages::error(&e),
            },
            Command::History { limit } => match c.recent_history(chat, limit).await {
                Ok(records) => messages::history(&records),
                Err(e) => messages::error(&e),
            },
            Command::Promote { user: target } => {
                self.owners.add_admin(chat, target);
                info!("⭐ {} es admin del chat {} (por {})", target, chat, user);
                format!("⭐ {} ahora es admin de este chat", target)
            }
            Command::Demote { user: target } => {
                if self.owners.remove_admin(chat, target) {
                    info!("➖ {} ya no es admin del chat {} (por {})", target, chat, user);
                    format!("➖ {} ya no es admin de este chat", target)
                } else {
                    format!("ℹ️ {} no era admin de este chat", target)
                }
            }
            Command::Drain { enabled } => {
                c.set_draining(enabled);
                if enabled {
                    "🚧 Modo drenaje activado".to_string()
                } else {
                    "✅ Modo drenaje desactivado".to_string()
                }
            }
            Command::ForceLeave => {
                let left = c.force_leave_all().await;
                format!("🚨 Salida forzada de {} llamadas", left)
            }
            Command::Sessions => messages::sessions_table(&c.sessions()),
            Command::Help => commands::HELP.to_string(),
        }
    }
}
