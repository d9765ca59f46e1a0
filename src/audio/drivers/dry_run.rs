use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::audio::call::CallDriver;
use crate::types::ChatId;

/// Driver sin red: registra cada llamada y simula el estado de conexión.
#[derive(Debug, Default)]
pub struct DryRunDriver {
    chat: Mutex<Option<ChatId>>,
    connected: AtomicBool,
    paused: AtomicBool,
    current: Mutex<Option<String>>,
}

impl DryRunDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fuente que se está "reproduciendo", si hay una
    pub fn current_source(&self) -> Option<String> {
        self.current.lock().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn label(&self) -> String {
        self.chat
            .lock()
            .map_or_else(|| "?".to_string(), |chat| chat.to_string())
    }

    fn start(&self, kind: &str, source: &str) -> anyhow::Result<()> {
        if !self.connected.load(Ordering::Relaxed) {
            anyhow::bail!("GROUPCALL_JOIN_MISSING: not connected");
        }
        info!("🎶 [dry-run] chat {} reproduce {} {}", self.label(), kind, source);
        *self.current.lock() = Some(source.to_string());
        self.paused.store(false, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl CallDriver for DryRunDriver {
    async fn join(&self, chat: ChatId) -> anyhow::Result<()> {
        *self.chat.lock() = Some(chat);
        self.connected.store(true, Ordering::Relaxed);
        info!("🔊 [dry-run] unido al chat de voz {}", chat);
        Ok(())
    }

    async fn start_audio(&self, source: &str) -> anyhow::Result<()> {
        self.start("audio", source)
    }

    async fn start_video(&self, source: &str) -> anyhow::Result<()> {
        self.start("video", source)
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.paused.store(paused, Ordering::Relaxed);
        let state = if paused { "⏸️ pausado" } else { "▶️ reanudado" };
        info!("[dry-run] chat {} {}", self.label(), state);
        Ok(())
    }

    async fn stop_media(&self) -> anyhow::Result<()> {
        *self.current.lock() = None;
        info!("⏹️ [dry-run] chat {} sin media", self.label());
        Ok(())
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        *self.current.lock() = None;
        info!("👋 [dry-run] chat {} abandonado", self.label());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
