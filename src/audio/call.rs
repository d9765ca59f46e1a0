//! Voice-call sessions.
//!
//! [`CallDriver`] is the shape of the external voice-call library. Each
//! backend implements it once (see [`crate::audio::drivers`]); the rest of
//! the crate only talks to [`CallSession`], which adds the settle delay and
//! the retry policy on top of any driver.

use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::types::ChatId;

/// Primitive operations of a voice-call backend for a single chat.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallDriver: Send + Sync {
    async fn join(&self, chat: ChatId) -> anyhow::Result<()>;
    async fn start_audio(&self, source: &str) -> anyhow::Result<()>;
    async fn start_video(&self, source: &str) -> anyhow::Result<()>;
    async fn set_pause(&self, paused: bool) -> anyhow::Result<()>;
    async fn stop_media(&self) -> anyhow::Result<()>;
    async fn leave(&self) -> anyhow::Result<()>;
    fn is_connected(&self) -> bool;
}

/// Channel a driver uses to report that the current media finished on its
/// own. Drivers without such a signal simply never send.
pub type StreamEndSender = tokio::sync::mpsc::UnboundedSender<ChatId>;

/// Builds the driver for a chat the first time a session is needed.
pub trait DriverFactory: Send + Sync {
    fn create(&self, chat: ChatId) -> Arc<dyn CallDriver>;
}

impl<F> DriverFactory for F
where
    F: Fn(ChatId) -> Arc<dyn CallDriver> + Send + Sync,
{
    fn create(&self, chat: ChatId) -> Arc<dyn CallDriver> {
        self(chat)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Intentos totales del paso "start media"
    pub attempts: u32,
    pub backoff: Duration,
    /// Pausa tras un join para que el estado de participantes se propague
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
            settle: Duration::from_millis(1200),
        }
    }
}

/// Fixed internal interface over one chat's [`CallDriver`].
pub struct CallSession {
    chat: ChatId,
    driver: Arc<dyn CallDriver>,
    policy: RetryPolicy,
}

impl CallSession {
    pub fn new(chat: ChatId, driver: Arc<dyn CallDriver>, policy: RetryPolicy) -> Self {
        Self {
            chat,
            driver,
            policy,
        }
    }

    pub fn chat(&self) -> ChatId {
        self.chat
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// Joins the call if needed, then starts `source` with retries.
    pub async fn join_and_start(&self, source: &str, is_video: bool) -> anyhow::Result<()> {
        self.ensure_joined().await?;
        self.start_with_retry(source, is_video).await
    }

    /// Swaps the running media for `source`, rejoining first if the call dropped.
    pub async fn change_stream(&self, source: &str, is_video: bool) -> anyhow::Result<()> {
        if !self.driver.is_connected() {
            warn!("⚠️ Chat {} desconectado al cambiar de stream, reconectando", self.chat);
        }
        self.ensure_joined().await?;
        self.start_with_retry(source, is_video).await
    }

    /// Best effort; returns `false` when no runtime was available to schedule it.
    pub fn pause(&self) -> bool {
        self.spawn_set_pause(true)
    }

    pub fn resume(&self) -> bool {
        self.spawn_set_pause(false)
    }

    /// Stops media output without leaving the call.
    pub async fn stop_playout(&self) -> anyhow::Result<()> {
        self.driver.stop_media().await
    }

    pub async fn leave(&self) -> anyhow::Result<()> {
        self.driver.leave().await?;
        info!("👋 Salida del chat de voz {}", self.chat);
        Ok(())
    }

    async fn ensure_joined(&self) -> anyhow::Result<()> {
        if self.driver.is_connected() {
            return Ok(());
        }
        self.driver.join(self.chat).await?;
        info!("🔊 Conectado al chat de voz {}", self.chat);
        tokio::time::sleep(self.policy.settle).await;
        Ok(())
    }

    async fn start_with_retry(&self, source: &str, is_video: bool) -> anyhow::Result<()> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = if is_video {
                self.driver.start_video(source).await
            } else {
                self.driver.start_audio(source).await
            };

            match result {
                Ok(()) => {
                    debug!("▶️ Media iniciada en chat {} (intento {})", self.chat, attempt);
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "⚠️ Intento {}/{} de iniciar media falló en chat {}: {}",
                        attempt, attempts, self.chat, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    error!(
                        "❌ No se pudo iniciar media en chat {} tras {} intentos: {}",
                        self.chat, attempts, e
                    );
                    return Err(e);
                }
            }
        }
    }

    fn spawn_set_pause(&self, paused: bool) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("Sin runtime activo, set_pause({}) omitido para chat {}", paused, self.chat);
            return false;
        };
        let driver = self.driver.clone();
        let chat = self.chat;
        handle.spawn(async move {
            if let Err(e) = driver.set_pause(paused).await {
                warn!("⚠️ set_pause({}) falló en chat {}: {}", paused, chat, e);
            }
        });
        true
    }
}

/// Owns every [`CallSession`]; at most one per chat.
pub struct CallManager {
    sessions: DashMap<ChatId, Arc<CallSession>>,
    factory: Box<dyn DriverFactory>,
    policy: RetryPolicy,
}

impl CallManager {
    pub fn new(factory: impl DriverFactory + 'static, policy: RetryPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            factory: Box::new(factory),
            policy,
        }
    }

    /// Returns the chat's session, creating it on first use.
    pub fn get_or_create(&self, chat: ChatId) -> Arc<CallSession> {
        self.sessions
            .entry(chat)
            .or_insert_with(|| {
                debug!("Nueva sesión de llamada para chat {}", chat);
                Arc::new(CallSession::new(chat, self.factory.create(chat), self.policy))
            })
            .clone()
    }

    pub fn get(&self, chat: ChatId) -> Option<Arc<CallSession>> {
        self.sessions.get(&chat).map(|session| session.clone())
    }

    pub fn is_connected(&self, chat: ChatId) -> bool {
        self.sessions
            .get(&chat)
            .is_some_and(|session| session.is_connected())
    }

    /// Drops the handle only. Callers leave the call first.
    pub fn remove(&self, chat: ChatId) -> Option<Arc<CallSession>> {
        self.sessions.remove(&chat).map(|(_, session)| session)
    }

    pub fn chats(&self) -> Vec<ChatId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
