//! Single-instance lease.
//!
//! Two bot processes joined to the same voice chats would fight over the
//! calls, so startup takes a file lease in `data_dir/instance.lock` and a
//! background task keeps renewing it.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    Acquired {
        /// `true` si se tomó de otra instancia cuyo lease venció
        takeover: bool,
    },
    HeldBy {
        instance_id: String,
        expires_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    instance_id: String,
    pid: u32,
    started_at: DateTime<Utc>,
    heartbeat_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct InstanceLease {
    instance_id: String,
    path: PathBuf,
    ttl: Duration,
}

impl InstanceLease {
    pub fn new(instance_id: impl Into<String>, data_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            instance_id: instance_id.into(),
            path: data_dir.into().join("instance.lock"),
            ttl,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn try_acquire(&self) -> Result<LeaseDecision> {
        self.try_acquire_at(Utc::now())
    }

    /// Acquires or renews the lease as of `now`.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> Result<LeaseDecision> {
        let ttl = ChronoDuration::from_std(self.ttl).context("TTL de lease fuera de rango")?;
        let expires_at = now + ttl;

        match self.read_record()? {
            None => {
                self.write_record(&self.record(now, now, expires_at))?;
                Ok(LeaseDecision::Acquired { takeover: false })
            }
            Some(existing) if existing.instance_id == self.instance_id => {
                self.write_record(&self.record(existing.started_at, now, expires_at))?;
                Ok(LeaseDecision::Acquired { takeover: false })
            }
            Some(existing) if existing.expires_at <= now => {
                warn!(
                    "⚠️ Lease de la instancia '{}' vencido, tomando el control",
                    existing.instance_id
                );
                self.write_record(&self.record(now, now, expires_at))?;
                Ok(LeaseDecision::Acquired { takeover: true })
            }
            Some(existing) => Ok(LeaseDecision::HeldBy {
                instance_id: existing.instance_id,
                expires_at: existing.expires_at,
            }),
        }
    }

    /// [`Self::try_acquire`] on the blocking pool; the lease file is read
    /// and written with blocking I/O.
    pub async fn renew(self: Arc<Self>) -> Result<LeaseDecision> {
        tokio::task::spawn_blocking(move || self.try_acquire())
            .await
            .context("la tarea de renovación del lease falló")?
    }

    /// Deletes the lease file if it still belongs to this instance.
    pub fn release(&self) -> Result<bool> {
        match self.read_record()? {
            Some(existing) if existing.instance_id == self.instance_id => {
                std::fs::remove_file(&self.path)?;
                info!("🔓 Lease liberado ({})", self.instance_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Renews every `ttl / 3` until `shutdown` is cancelled. Losing the lease
    /// to another instance cancels `shutdown`.
    pub fn spawn_renewal(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let period = (self.ttl / 3).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.clone().renew().await {
                    Ok(LeaseDecision::Acquired { .. }) => debug!("💓 Lease renovado"),
                    Ok(LeaseDecision::HeldBy { instance_id, .. }) => {
                        error!("❌ Lease tomado por la instancia '{}', deteniendo", instance_id);
                        shutdown.cancel();
                        break;
                    }
                    Err(e) => warn!("⚠️ No se pudo renovar el lease: {:?}", e),
                }
            }
        })
    }

    fn record(&self, started_at: DateTime<Utc>, heartbeat_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> LeaseRecord {
        LeaseRecord {
            instance_id: self.instance_id.clone(),
            pid: std::process::id(),
            started_at,
            heartbeat_at,
            expires_at,
        }
    }

    fn read_record(&self) -> Result<Option<LeaseRecord>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("no se pudo leer el lease"),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Ignorando lease corrupto en {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn write_record(&self, record: &LeaseRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &self.path).context("no se pudo escribir el lease")?;
        Ok(())
    }
}
