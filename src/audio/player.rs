//! Per-chat playback state machine.
//!
//! [`PlaybackController`] glues the queue, the call sessions, the decode
//! workers and the idle machinery together. It stores no state of its own
//! beyond ballots and markers: "what is playing" is always the queue head,
//! and the state reported by [`PlaybackController::state`] is derived from
//! the queue and the call session on every read.
//!
//! Mutating sequences on one chat (`request_play` start, `advance`,
//! vote counting, `stop`, stream-end notifications, idle teardown) run under
//! that chat's [`ChatLocks`] entry, so a vote-skip and an idle timeout cannot
//! interleave around a call-layer await.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use std::{
    collections::{BTreeSet, HashSet},
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        call::{CallManager, CallSession},
        idle::{ActivityTracker, IdleSweep, IdleTimers, SweepReport},
        queue::{QueueStore, Track},
        stream::StreamTracker,
    },
    error::PlaybackError,
    permissions::PrivilegeCheck,
    settings::{LoopMode, SettingError, SettingKey, SettingValue, Settings, SettingsCache},
    sources::MediaResolver,
    storage::{PlayHistory, PlayRecord},
    types::{ChatId, UserId},
};

/// Explicit view of a chat's playback, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Transitioning,
    Stopped,
}

impl PlaybackState {
    /// `stopping` wins over `transitioning`; a queued head without a live
    /// call (failed start, dropped call) reads as `Idle`.
    pub fn derive(queued: bool, connected: bool, transitioning: bool, stopping: bool) -> Self {
        if stopping {
            PlaybackState::Stopped
        } else if transitioning {
            PlaybackState::Transitioning
        } else if queued && connected {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Started { track: Track },
    Queued { track: Track, position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipOutcome {
    Advanced { next: Track },
    QueueEnded,
    Voted { votes: usize, threshold: usize },
}

/// Diagnostic row for one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub chat: ChatId,
    pub connected: bool,
    pub queue_size: usize,
    pub worker_running: bool,
    pub idle_for: Option<Duration>,
    pub state: PlaybackState,
}

/// Vote-skip ballots: one set of voters per chat.
#[derive(Debug, Default)]
pub struct VoteBallots {
    ballots: DashMap<ChatId, HashSet<UserId>>,
}

impl VoteBallots {
    /// Adds a vote and returns the ballot size. Repeat voters count once.
    pub fn add(&self, chat: ChatId, user: UserId) -> usize {
        let mut ballot = self.ballots.entry(chat).or_default();
        ballot.insert(user);
        ballot.len()
    }

    pub fn count(&self, chat: ChatId) -> usize {
        self.ballots.get(&chat).map_or(0, |ballot| ballot.len())
    }

    pub fn reset(&self, chat: ChatId) {
        self.ballots.remove(&chat);
    }

    pub fn clear(&self) {
        self.ballots.clear();
    }
}

/// One async mutex per chat.
#[derive(Debug, Default)]
pub struct ChatLocks {
    locks: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl ChatLocks {
    pub async fn lock(&self, chat: ChatId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(chat).or_default().clone();
        lock.lock_owned().await
    }
}

/// Marca un chat mientras dura una operación; se desmarca al soltarse.
struct Marker {
    set: Arc<DashSet<ChatId>>,
    chat: ChatId,
}

impl Marker {
    fn new(set: &Arc<DashSet<ChatId>>, chat: ChatId) -> Self {
        set.insert(chat);
        Self {
            set: set.clone(),
            chat,
        }
    }
}

impl Drop for Marker {
    fn drop(&mut self) {
        self.set.remove(&self.chat);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    /// Retraso del temporizador de inactividad tras vaciarse la cola
    pub idle_timeout: Duration,
    /// Decodificar audio localmente con ffmpeg antes de entregarlo a la llamada
    pub local_decode: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(600),
            local_decode: false,
        }
    }
}

/// Collaborators the controller is built from.
pub struct PlaybackDeps {
    pub queue: Arc<QueueStore>,
    pub calls: Arc<CallManager>,
    pub streams: Arc<StreamTracker>,
    pub settings: Arc<SettingsCache>,
    pub history: Arc<dyn PlayHistory>,
    pub resolver: Arc<dyn MediaResolver>,
    pub privileges: Arc<dyn PrivilegeCheck>,
}

pub struct PlaybackController {
    queue: Arc<QueueStore>,
    calls: Arc<CallManager>,
    streams: Arc<StreamTracker>,
    settings: Arc<SettingsCache>,
    history: Arc<dyn PlayHistory>,
    resolver: Arc<dyn MediaResolver>,
    privileges: Arc<dyn PrivilegeCheck>,
    ballots: Arc<VoteBallots>,
    idle: IdleTimers,
    activity: Arc<ActivityTracker>,
    locks: Arc<ChatLocks>,
    transitioning: Arc<DashSet<ChatId>>,
    stopping: Arc<DashSet<ChatId>>,
    draining: Arc<AtomicBool>,
    options: PlayerOptions,
}

impl PlaybackController {
    pub fn new(deps: PlaybackDeps, options: PlayerOptions) -> Self {
        Self {
            queue: deps.queue,
            calls: deps.calls,
            streams: deps.streams,
            settings: deps.settings,
            history: deps.history,
            resolver: deps.resolver,
            privileges: deps.privileges,
            ballots: Arc::new(VoteBallots::default()),
            idle: IdleTimers::new(),
            activity: Arc::new(ActivityTracker::new()),
            locks: Arc::new(ChatLocks::default()),
            transitioning: Arc::new(DashSet::new()),
            stopping: Arc::new(DashSet::new()),
            draining: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    /// Resolves `query` and hands the result to [`Self::request_play`].
    pub async fn play_query(
        &self,
        chat: ChatId,
        user: UserId,
        query: &str,
        is_video: bool,
        force: bool,
    ) -> Result<PlayOutcome, PlaybackError> {
        // Rechazos baratos antes de la extracción, que es lenta
        let privileged = self.privileges.is_privileged(chat, user).await;
        self.check_admission(force, privileged)?;

        let info = self
            .resolver
            .extract_track(query, is_video)
            .await
            .ok_or(PlaybackError::Resolution)?;
        self.request_play(chat, user, info.into_track(user), force).await
    }

    /// Enqueues `track` and starts it when it lands at the head.
    ///
    /// A failed start leaves the track queued at the head so a retry or a
    /// skip can recover.
    pub async fn request_play(
        &self,
        chat: ChatId,
        user: UserId,
        track: Track,
        force: bool,
    ) -> Result<PlayOutcome, PlaybackError> {
        let privileged = self.privileges.is_privileged(chat, user).await;
        self.check_admission(force, privileged)?;

        let settings = self.settings.get(chat).await;
        if settings.max_duration > 0 && track.duration > settings.max_duration {
            info!(
                "⛔ '{}' rechazado en chat {}: {}s > {}s",
                track.title, chat, track.duration, settings.max_duration
            );
            return Err(PlaybackError::TooLong {
                max_minutes: settings.max_duration / 60,
            });
        }

        let _lock = self.locks.lock(chat).await;

        if !force && !privileged {
            if self.queue.size(chat) >= settings.queue_cap {
                return Err(PlaybackError::QueueFull {
                    cap: settings.queue_cap,
                });
            }
            if self.queue.has_duplicate(chat, &track.url, &track.title) {
                return Err(PlaybackError::Duplicate);
            }
        }

        let position = self.queue.enqueue(chat, track.clone(), force);
        self.activity.record(chat);
        self.idle.cancel(chat);

        if position > 0 {
            return Ok(PlayOutcome::Queued { track, position });
        }

        let _marker = Marker::new(&self.transitioning, chat);
        self.ballots.reset(chat);
        self.start_stream(chat, &track).await?;
        self.register_play(chat, &track).await;
        Ok(PlayOutcome::Started { track })
    }

    /// Skips the current track ("do skip").
    pub async fn advance(&self, chat: ChatId) -> Result<SkipOutcome, PlaybackError> {
        let _lock = self.locks.lock(chat).await;
        let _marker = Marker::new(&self.transitioning, chat);
        self.advance_locked(chat).await
    }

    pub async fn vote_skip(&self, chat: ChatId, user: UserId) -> Result<SkipOutcome, PlaybackError> {
        if self.queue.size(chat) == 0 {
            return Err(PlaybackError::NothingPlaying);
        }

        if self.privileges.is_privileged(chat, user).await {
            info!("⏭️ Skip directo de {} en chat {}", user, chat);
            return self.advance(chat).await;
        }

        let threshold = self.settings.get(chat).await.vote_skip_threshold;

        // El voto cuenta para la canción que suena al tomar el candado
        let _lock = self.locks.lock(chat).await;
        if self.queue.size(chat) == 0 {
            return Err(PlaybackError::NothingPlaying);
        }
        let votes = self.ballots.add(chat, user);
        self.activity.record(chat);

        if votes >= threshold {
            info!("🗳️ Votación de skip aprobada en chat {} ({}/{})", chat, votes, threshold);
            let _marker = Marker::new(&self.transitioning, chat);
            self.advance_locked(chat).await
        } else {
            debug!("🗳️ Voto de {} en chat {} ({}/{})", user, chat, votes, threshold);
            Ok(SkipOutcome::Voted { votes, threshold })
        }
    }

    /// Moves on after the call backend reports that the media finished by
    /// itself. Returns `None` when there was nothing to advance.
    pub async fn on_stream_end(&self, chat: ChatId) -> Option<SkipOutcome> {
        let _lock = self.locks.lock(chat).await;
        if self.queue.size(chat) == 0 || self.calls.get(chat).is_none() {
            debug!("🔚 Fin de stream ignorado en chat {}: nada sonando", chat);
            return None;
        }

        info!("🔚 Terminó la canción en chat {}", chat);
        let _marker = Marker::new(&self.transitioning, chat);
        match self.advance_locked(chat).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("⚠️ No se pudo pasar a la siguiente en chat {}: {}", chat, e);
                None
            }
        }
    }

    /// Feeds end-of-media notifications from the call drivers into
    /// [`Self::on_stream_end`] until `shutdown` fires or every sender is gone.
    pub fn spawn_stream_end_listener(
        &self,
        mut ended: mpsc::UnboundedReceiver<ChatId>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    chat = ended.recv() => match chat {
                        Some(chat) => {
                            controller.on_stream_end(chat).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("Escucha de fin de stream detenida");
        })
    }

    /// Tears the chat's playback down. Returns whether anything was active.
    pub async fn stop(&self, chat: ChatId) -> bool {
        let _lock = self.locks.lock(chat).await;
        let _marker = Marker::new(&self.stopping, chat);
        let was_active = self.queue.size(chat) > 0 || self.calls.get(chat).is_some();
        self.teardown_locked(chat, true).await;
        info!("⏹️ Reproducción detenida en chat {}", chat);
        was_active
    }

    pub fn pause(&self, chat: ChatId) -> Result<(), PlaybackError> {
        let session = self.playing_session(chat)?;
        session.pause();
        self.activity.record(chat);
        info!("⏸️ Pausa solicitada en chat {}", chat);
        Ok(())
    }

    pub fn resume(&self, chat: ChatId) -> Result<(), PlaybackError> {
        let session = self.playing_session(chat)?;
        session.resume();
        self.activity.record(chat);
        info!("▶️ Reanudación solicitada en chat {}", chat);
        Ok(())
    }

    /// Restarts the current head from the beginning.
    pub async fn replay(&self, chat: ChatId) -> Result<Track, PlaybackError> {
        let _lock = self.locks.lock(chat).await;
        let track = self.queue.peek_head(chat).ok_or(PlaybackError::NothingPlaying)?;
        let _marker = Marker::new(&self.transitioning, chat);
        self.ballots.reset(chat);
        self.start_stream(chat, &track).await?;
        self.activity.record(chat);
        Ok(track)
    }

    /// Removes the 1-based `position`; the playing track cannot be removed.
    pub fn remove(&self, chat: ChatId, position: usize) -> Result<Track, PlaybackError> {
        let track = self
            .queue
            .remove_at(chat, position)
            .ok_or(PlaybackError::InvalidPosition)?;
        self.activity.record(chat);
        Ok(track)
    }

    pub fn shuffle(&self, chat: ChatId) -> usize {
        self.activity.record(chat);
        self.queue.shuffle(chat)
    }

    /// Drops every upcoming track, keeping the current one. Privileged only.
    pub async fn clear_pending(&self, chat: ChatId, user: UserId) -> Result<usize, PlaybackError> {
        if !self.privileges.is_privileged(chat, user).await {
            return Err(PlaybackError::NotPrivileged);
        }
        let removed = self.queue.clear_pending(chat);
        info!("🗑️ {} pendientes quitados en chat {}", removed, chat);
        Ok(removed)
    }

    /// Validates and stores one setting. Privileged only.
    pub async fn update_setting(
        &self,
        chat: ChatId,
        user: UserId,
        key: &str,
        raw: &str,
    ) -> Result<Settings, PlaybackError> {
        if !self.privileges.is_privileged(chat, user).await {
            return Err(PlaybackError::NotPrivileged);
        }
        let key = SettingKey::parse(key).ok_or_else(|| {
            PlaybackError::InvalidSetting(SettingError::UnknownKey(key.to_string()).to_string())
        })?;
        let value =
            SettingValue::parse(key, raw).map_err(|e| PlaybackError::InvalidSetting(e.to_string()))?;

        self.settings.set(chat, key, value).await.map_err(|e| {
            error!("❌ No se pudo guardar {}={} en chat {}: {:?}", key, value, chat, e);
            PlaybackError::Storage(e.to_string())
        })
    }

    /// Last `limit` plays recorded for the chat, oldest first.
    pub async fn recent_history(&self, chat: ChatId, limit: usize) -> Result<Vec<PlayRecord>, PlaybackError> {
        self.history.recent_plays(chat, limit).await.map_err(|e| {
            warn!("⚠️ No se pudo leer el historial del chat {}: {:?}", chat, e);
            PlaybackError::Storage(e.to_string())
        })
    }

    pub async fn chat_settings(&self, chat: ChatId) -> Settings {
        self.settings.get(chat).await
    }

    pub fn state(&self, chat: ChatId) -> PlaybackState {
        PlaybackState::derive(
            self.queue.size(chat) > 0,
            self.calls.is_connected(chat),
            self.transitioning.contains(&chat),
            self.stopping.contains(&chat),
        )
    }

    pub fn current_track(&self, chat: ChatId) -> Option<Track> {
        self.queue.peek_head(chat)
    }

    pub fn get_queue(&self, chat: ChatId) -> Vec<Track> {
        self.queue.snapshot(chat)
    }

    pub fn queue_duration(&self, chat: ChatId) -> Duration {
        self.queue.total_duration(chat)
    }

    pub fn votes(&self, chat: ChatId) -> usize {
        self.ballots.count(chat)
    }

    /// Every chat with a session or a queue, sorted by id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.known_chats()
            .into_iter()
            .map(|chat| SessionInfo {
                chat,
                connected: self.calls.is_connected(chat),
                queue_size: self.queue.size(chat),
                worker_running: self.streams.is_running(chat),
                idle_for: self.activity.idle_for(chat),
                state: self.state(chat),
            })
            .collect()
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
        if draining {
            warn!("🚧 Modo drenaje activado: nuevas reproducciones rechazadas");
        } else {
            info!("✅ Modo drenaje desactivado");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Full teardown of every known chat. Returns how many were cleared.
    pub async fn force_stop_all(&self) -> usize {
        let chats = self.known_chats();
        for chat in &chats {
            self.stop(*chat).await;
        }
        self.idle.cancel_all();
        self.activity.clear();
        self.ballots.clear();
        warn!("🚨 Parada forzada de {} chats", chats.len());
        chats.len()
    }

    /// Leaves every call without waiting on per-chat locks. Returns how many
    /// sessions were dropped.
    pub async fn force_leave_all(&self) -> usize {
        let chats = self.calls.chats();
        for chat in &chats {
            self.queue.clear(*chat);
            self.ballots.reset(*chat);
            self.streams.kill(*chat).await;
            self.leave_session(*chat).await;
        }
        self.idle.cancel_all();
        self.activity.clear();
        warn!("🚨 Salida forzada de {} llamadas", chats.len());
        chats.len()
    }

    /// Leaves every call and kills every worker. Used at process exit.
    pub async fn shutdown(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let sessions = self.force_leave_all().await;
        let workers = self.streams.cleanup_all().await;
        let queues = self.queue.clear_all();
        info!(
            "🛑 Apagado: {} llamadas, {} decodificadores, {} colas",
            sessions, workers, queues
        );
    }

    // Métodos privados

    fn check_admission(&self, force: bool, privileged: bool) -> Result<(), PlaybackError> {
        if force && !privileged {
            return Err(PlaybackError::NotPrivileged);
        }
        if self.is_draining() && !privileged {
            return Err(PlaybackError::Draining);
        }
        Ok(())
    }

    fn playing_session(&self, chat: ChatId) -> Result<Arc<CallSession>, PlaybackError> {
        if self.queue.size(chat) == 0 {
            return Err(PlaybackError::NothingPlaying);
        }
        self.calls.get(chat).ok_or(PlaybackError::NothingPlaying)
    }

    fn known_chats(&self) -> Vec<ChatId> {
        let chats: BTreeSet<ChatId> = self
            .calls
            .chats()
            .into_iter()
            .chain(self.queue.chats())
            .collect();
        chats.into_iter().collect()
    }

    async fn advance_locked(&self, chat: ChatId) -> Result<SkipOutcome, PlaybackError> {
        self.ballots.reset(chat);
        let popped = self.queue.advance(chat);
        let settings = self.settings.get(chat).await;

        if let Some(track) = &popped {
            match settings.loop_mode {
                LoopMode::Queue => {
                    self.queue.append(chat, track.clone());
                }
                LoopMode::Track if self.queue.size(chat) == 0 => {
                    self.queue.prepend(chat, track.clone());
                }
                _ => {}
            }
        }

        if self.queue.size(chat) == 0 && settings.autoplay {
            if let Some(seed) = &popped {
                match self.resolver.related_track(&seed.title, seed.is_video).await {
                    Some(info) => {
                        self.queue.append(chat, info.into_track(UserId::BOT));
                    }
                    None => debug!("📻 Autoplay sin resultados para '{}' en chat {}", seed.title, chat),
                }
            }
        }

        let Some(next) = self.queue.peek_head(chat) else {
            self.teardown_locked(chat, false).await;
            self.arm_idle_timer(chat);
            info!("📭 Cola terminada en chat {}", chat);
            return Ok(SkipOutcome::QueueEnded);
        };

        self.start_stream(chat, &next).await?;
        self.register_play(chat, &next).await;
        self.idle.cancel(chat);
        self.activity.record(chat);
        Ok(SkipOutcome::Advanced { next })
    }

    async fn start_stream(&self, chat: ChatId, track: &Track) -> Result<(), PlaybackError> {
        let source = self
            .resolver
            .resolve_stream_source(&track.url, track.is_video)
            .await
            .ok_or_else(|| {
                warn!("⚠️ Sin fuente reproducible para '{}' en chat {}", track.title, chat);
                PlaybackError::Resolution
            })?;

        let decoded = self.options.local_decode && !track.is_video;
        let play_source = if decoded {
            self.streams.start(chat, &source).await?.display().to_string()
        } else {
            // Un worker de la canción anterior no tiene quién lo lea
            if self.streams.is_running(chat) {
                self.streams.kill(chat).await;
            }
            source
        };

        let session = self.calls.get_or_create(chat);
        let result = if session.is_connected() {
            session.change_stream(&play_source, track.is_video).await
        } else {
            session.join_and_start(&play_source, track.is_video).await
        };

        match result {
            Ok(()) => {
                info!("🎵 Reproduciendo '{}' en chat {}", track.title, chat);
                Ok(())
            }
            Err(e) => {
                error!("❌ Fallo al iniciar '{}' en chat {}: {:?}", track.title, chat, e);
                if decoded {
                    self.streams.kill(chat).await;
                }
                Err(PlaybackError::from_call_error(&e))
            }
        }
    }

    async fn register_play(&self, chat: ChatId, track: &Track) {
        if let Err(e) = self.history.record_play(chat, track).await {
            warn!("⚠️ No se pudo registrar '{}' en el historial del chat {}: {}", track.title, chat, e);
        }
        if let Err(e) = self.history.increment_play_counter().await {
            warn!("⚠️ No se pudo incrementar el contador de reproducciones: {}", e);
        }
    }

    /// Best-effort cleanup. Never fails; queue and handle are cleared regardless.
    async fn teardown_locked(&self, chat: ChatId, forget_activity: bool) {
        self.queue.clear(chat);
        self.ballots.reset(chat);
        self.idle.cancel(chat);
        if forget_activity {
            self.activity.remove(chat);
        }
        self.streams.kill(chat).await;
        self.leave_session(chat).await;
    }

    async fn leave_session(&self, chat: ChatId) {
        let Some(session) = self.calls.remove(chat) else {
            return;
        };
        if let Err(e) = session.stop_playout().await {
            debug!("stop_playout falló en chat {}: {}", chat, e);
        }
        if let Err(e) = session.leave().await {
            warn!("⚠️ Error al salir del chat de voz {}: {}", chat, e);
        }
    }

    fn arm_idle_timer(&self, chat: ChatId) {
        let controller = self.clone();
        self.idle.start(chat, self.options.idle_timeout, async move {
            controller.on_idle_timeout(chat).await;
        });
    }

    async fn on_idle_timeout(&self, chat: ChatId) {
        let _lock = self.locks.lock(chat).await;
        if self.queue.size(chat) > 0 {
            debug!("⏱️ Chat {} volvió a tener cola, se ignora el temporizador", chat);
            return;
        }
        let _marker = Marker::new(&self.stopping, chat);
        self.teardown_locked(chat, true).await;
        info!("💤 Chat {} liberado por inactividad", chat);
    }

    async fn reap_if_idle(&self, chat: ChatId, report: &mut SweepReport) {
        let _lock = self.locks.lock(chat).await;
        if self.queue.size(chat) > 0 {
            self.activity.record(chat);
            report.refreshed += 1;
            return;
        }
        let _marker = Marker::new(&self.stopping, chat);
        self.teardown_locked(chat, true).await;
        report.stopped += 1;
        info!("🧹 Chat {} detenido por el barrido de inactividad", chat);
    }
}

impl Clone for PlaybackController {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            calls: self.calls.clone(),
            streams: self.streams.clone(),
            settings: self.settings.clone(),
            history: self.history.clone(),
            resolver: self.resolver.clone(),
            privileges: self.privileges.clone(),
            ballots: self.ballots.clone(),
            idle: self.idle.clone(),
            activity: self.activity.clone(),
            locks: self.locks.clone(),
            transitioning: self.transitioning.clone(),
            stopping: self.stopping.clone(),
            draining: self.draining.clone(),
            options: self.options,
        }
    }
}

#[async_trait]
impl IdleSweep for PlaybackController {
    async fn sweep_idle(&self) -> anyhow::Result<SweepReport> {
        let stale = self.activity.stale(self.options.idle_timeout);
        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };

        for chat in stale {
            let mut chat_report = SweepReport::default();
            let outcome = AssertUnwindSafe(self.reap_if_idle(chat, &mut chat_report))
                .catch_unwind()
                .await;
            match outcome {
                Ok(()) => {
                    report.stopped += chat_report.stopped;
                    report.refreshed += chat_report.refreshed;
                }
                Err(_) => {
                    error!("💥 Pánico limpiando el chat {} en el barrido", chat);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
