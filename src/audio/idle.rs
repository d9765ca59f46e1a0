//! Inactivity handling.
//!
//! Two mechanisms run side by side:
//!
//! - [`IdleTimers`]: a one-shot, cancellable timer per chat, armed when a
//!   track ends with an empty queue and cancelled by any new activity.
//! - [`run_idle_sweep`]: a global loop that periodically asks an
//!   [`IdleSweep`] target to reap chats whose last activity is too old.
//!
//! Both end in the same teardown as an explicit stop.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use rand::Rng;
use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::types::ChatId;

struct ArmedTimer {
    generation: u64,
    token: CancellationToken,
}

/// Per-chat one-shot timers. Clones share the same table.
#[derive(Clone, Default)]
pub struct IdleTimers {
    timers: Arc<DashMap<ChatId, ArmedTimer>>,
    generation: Arc<AtomicU64>,
}

impl IdleTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the chat's timer, replacing any previous one. `on_fire` runs after
    /// `delay` unless [`Self::cancel`] is called first.
    pub fn start<F>(&self, chat: ChatId, delay: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        if let Some(previous) = self.timers.insert(
            chat,
            ArmedTimer {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let timers = self.timers.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("⏱️ Temporizador de inactividad cancelado para chat {}", chat);
                }
                _ = tokio::time::sleep(delay) => {
                    timers.remove_if(&chat, |_, armed| armed.generation == generation);
                    info!("💤 Temporizador de inactividad disparado para chat {}", chat);
                    on_fire.await;
                }
            }
        });
        debug!(
            "⏱️ Temporizador de inactividad armado para chat {} ({})",
            chat,
            humantime::format_duration(delay)
        );
    }

    pub fn cancel(&self, chat: ChatId) -> bool {
        match self.timers.remove(&chat) {
            Some((_, armed)) => {
                armed.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let chats: Vec<ChatId> = self.timers.iter().map(|entry| *entry.key()).collect();
        chats.into_iter().filter(|chat| self.cancel(*chat)).count()
    }

    pub fn is_armed(&self, chat: ChatId) -> bool {
        self.timers.contains_key(&chat)
    }
}

/// Last-activity timestamps per chat.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    last_seen: DashMap<ChatId, Instant>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, chat: ChatId) {
        self.last_seen.insert(chat, Instant::now());
    }

    pub fn remove(&self, chat: ChatId) {
        self.last_seen.remove(&chat);
    }

    pub fn last_seen(&self, chat: ChatId) -> Option<Instant> {
        self.last_seen.get(&chat).map(|seen| *seen)
    }

    /// Time since the chat's last activity, if any was recorded.
    pub fn idle_for(&self, chat: ChatId) -> Option<Duration> {
        self.last_seen(chat).map(|seen| seen.elapsed())
    }

    /// Chats whose last activity is at least `timeout` old.
    pub fn stale(&self, timeout: Duration) -> Vec<ChatId> {
        let now = Instant::now();
        self.last_seen
            .iter()
            .filter(|entry| now.saturating_duration_since(*entry.value()) >= timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn clear(&self) {
        self.last_seen.clear();
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// What one sweep iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub stopped: usize,
    pub refreshed: usize,
    pub failed: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdleSweep: Send + Sync {
    async fn sweep_idle(&self) -> anyhow::Result<SweepReport>;
}

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Desfase aleatorio ± para desincronizar despliegues
    pub jitter: Duration,
    /// Espera tras una iteración fallida
    pub backoff: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            jitter: Duration::from_secs(10),
            backoff: Duration::from_secs(10),
        }
    }
}

fn jittered(config: &SweepConfig) -> Duration {
    if config.jitter.is_zero() {
        return config.interval;
    }
    let jitter = config.jitter.as_secs_f64();
    let offset = rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((config.interval.as_secs_f64() + offset).max(1.0))
}

/// Runs the periodic sweep until `shutdown` is cancelled.
///
/// Errors and panics inside an iteration are logged, followed by
/// `config.backoff` before the loop continues.
pub async fn run_idle_sweep<S>(target: Arc<S>, config: SweepConfig, shutdown: CancellationToken)
where
    S: IdleSweep + ?Sized,
{
    info!(
        "🧹 Barrido de inactividad cada {} (±{})",
        humantime::format_duration(config.interval),
        humantime::format_duration(config.jitter)
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(jittered(&config)) => {}
        }

        let outcome = AssertUnwindSafe(target.sweep_idle()).catch_unwind().await;
        let failed = match outcome {
            Ok(Ok(report)) => {
                if report.stopped > 0 || report.failed > 0 {
                    info!(
                        "🧹 Barrido: {} revisados, {} detenidos, {} renovados, {} fallidos",
                        report.scanned, report.stopped, report.refreshed, report.failed
                    );
                } else {
                    debug!("🧹 Barrido sin cambios ({} chats revisados)", report.scanned);
                }
                false
            }
            Ok(Err(e)) => {
                error!("❌ Error en el barrido de inactividad: {:?}", e);
                true
            }
            Err(_) => {
                error!("💥 Pánico en el barrido de inactividad");
                true
            }
        };

        if failed {
            warn!(
                "⏳ Reintentando barrido en {}",
                humantime::format_duration(config.backoff)
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(config.backoff) => {}
            }
        }
    }

    info!("🛑 Barrido de inactividad detenido");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const CHAT: ChatId = ChatId(-300);

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let timers = IdleTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timers.start(CHAT, Duration::from_secs(600), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.is_armed(CHAT));

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(CHAT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let timers = IdleTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        timers.start(CHAT, Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timers.cancel(CHAT));
        assert!(!timers.cancel(CHAT));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let timers = IdleTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let first = fired.clone();
        timers.start(CHAT, Duration::from_secs(10), async move {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = fired.clone();
        timers.start(CHAT, Duration::from_secs(20), async move {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert_eq!(timers.cancel_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_chats() {
        let activity = ActivityTracker::new();
        activity.record(ChatId(1));
        tokio::time::advance(Duration::from_secs(100)).await;
        activity.record(ChatId(2));

        assert_eq!(activity.stale(Duration::from_secs(60)), vec![ChatId(1)]);
        assert_eq!(activity.idle_for(ChatId(2)), Some(Duration::ZERO));
        activity.remove(ChatId(1));
        assert!(activity.stale(Duration::from_secs(60)).is_empty());
    }

    struct FlakySweep {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdleSweep for FlakySweep {
        async fn sweep_idle(&self) -> anyhow::Result<SweepReport> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => anyhow::bail!("store down"),
                1 => panic!("boom"),
                _ => Ok(SweepReport::default()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_survives_errors_and_panics() {
        let target = Arc::new(FlakySweep {
            calls: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let config = SweepConfig {
            interval: Duration::from_secs(300),
            jitter: Duration::ZERO,
            backoff: Duration::from_secs(10),
        };

        let handle = tokio::spawn(run_idle_sweep(target.clone(), config, shutdown.clone()));

        // error + backoff, pánico + backoff, y una iteración sana
        tokio::time::sleep(Duration::from_secs(300 + 10 + 300 + 10 + 300 + 1)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_calls_target_each_interval() {
        let mut target = MockIdleSweep::new();
        target
            .expect_sweep_idle()
            .times(2)
            .returning(|| Ok(SweepReport::default()));

        let shutdown = CancellationToken::new();
        let config = SweepConfig {
            interval: Duration::from_secs(60),
            jitter: Duration::ZERO,
            backoff: Duration::from_secs(5),
        };
        let handle = tokio::spawn(run_idle_sweep(Arc::new(target), config, shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(130)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = SweepConfig::default();
        for _ in 0..100 {
            let d = jittered(&config);
            assert!(d >= Duration::from_secs(290) && d <= Duration::from_secs(310));
        }
    }
}
