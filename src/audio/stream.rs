//! Local decode workers.
//!
//! Each chat owns at most one ffmpeg process that decodes the current
//! source into raw s16le PCM at `<cache_dir>/stream_<chat>.raw`. The path
//! only depends on the chat id, so [`StreamTracker::kill`] can always find
//! and delete the file, even for workers started by a previous process.

use dashmap::DashMap;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::{io::AsyncWriteExt, process::Child, process::Command};
use tracing::{debug, error, info, warn};

use crate::error::PlaybackError;
use crate::types::ChatId;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub program: PathBuf,
    /// Argumentos que van antes de los de decodificación
    pub leading_args: Vec<String>,
    pub cache_dir: PathBuf,
    /// Tiempo que se le da al worker para llenar el buffer inicial
    pub warmup: Duration,
    /// Espera tras pedir salida ordenada antes de matar el proceso
    pub kill_timeout: Duration,
}

impl StreamOptions {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            leading_args: vec!["-hide_banner".into(), "-loglevel".into(), "error".into()],
            cache_dir: cache_dir.into(),
            warmup: Duration::from_millis(1500),
            kill_timeout: Duration::from_secs(2),
        }
    }
}

pub struct StreamTracker {
    workers: DashMap<ChatId, Child>,
    options: StreamOptions,
}

impl StreamTracker {
    pub fn new(options: StreamOptions) -> Self {
        Self {
            workers: DashMap::new(),
            options,
        }
    }

    pub fn cache_path(&self, chat: ChatId) -> PathBuf {
        cache_path_in(&self.options.cache_dir, chat)
    }

    pub fn is_running(&self, chat: ChatId) -> bool {
        self.workers.contains_key(&chat)
    }

    /// OS pid of the chat's worker, if one is tracked.
    pub fn worker_pid(&self, chat: ChatId) -> Option<u32> {
        self.workers.get(&chat).and_then(|child| child.id())
    }

    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    /// Restarts the chat's worker on `source` and waits for the first buffer.
    ///
    /// Returns the cache path the worker writes to.
    pub async fn start(&self, chat: ChatId, source: &str) -> Result<PathBuf, PlaybackError> {
        self.kill(chat).await;

        tokio::fs::create_dir_all(&self.options.cache_dir)
            .await
            .map_err(|e| {
                error!("❌ No se pudo crear el directorio de caché {}: {}", self.options.cache_dir.display(), e);
                PlaybackError::Worker(e.to_string())
            })?;

        let target = self.cache_path(chat);
        let mut cmd = Command::new(&self.options.program);
        cmd.args(&self.options.leading_args)
            .args(decode_args(source, &target))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            error!("❌ Fallo al iniciar el decodificador para chat {}: {}", chat, e);
            PlaybackError::Worker(e.to_string())
        })?;
        self.workers.insert(chat, child);
        info!("🎛️ Decodificador iniciado para chat {} -> {}", chat, target.display());

        tokio::time::sleep(self.options.warmup).await;

        // Si murió durante el arranque no hay nada que reproducir.
        let exited = self
            .workers
            .get_mut(&chat)
            .and_then(|mut child| child.try_wait().ok().flatten());
        if let Some(status) = exited {
            if !status.success() {
                self.workers.remove(&chat);
                remove_cache_file(&target).await;
                warn!("⚠️ El decodificador del chat {} terminó con {}", chat, status);
                return Err(PlaybackError::Worker(format!("el decodificador terminó con {status}")));
            }
        }

        Ok(target)
    }

    /// Stops the chat's worker and deletes its cache file. Safe without a worker.
    pub async fn kill(&self, chat: ChatId) {
        if let Some((_, child)) = self.workers.remove(&chat) {
            stop_child(chat, child, self.options.kill_timeout).await;
        }
        remove_cache_file(&self.cache_path(chat)).await;
    }

    /// Kills every tracked worker. Returns how many there were.
    pub async fn cleanup_all(&self) -> usize {
        let chats: Vec<ChatId> = self.workers.iter().map(|entry| *entry.key()).collect();
        for chat in &chats {
            self.kill(*chat).await;
        }
        if !chats.is_empty() {
            info!("🧹 {} decodificadores detenidos", chats.len());
        }
        chats.len()
    }
}

fn cache_path_in(cache_dir: &Path, chat: ChatId) -> PathBuf {
    cache_dir.join(format!("stream_{}.raw", chat.0))
}

fn decode_args(source: &str, target: &Path) -> Vec<String> {
    vec![
        "-re".into(),
        "-i".into(),
        source.into(),
        "-f".into(),
        "s16le".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        "48000".into(),
        "-acodec".into(),
        "pcm_s16le".into(),
        "-y".into(),
        target.display().to_string(),
    ]
}

async fn stop_child(chat: ChatId, mut child: Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    // ffmpeg sale limpio al recibir 'q' por stdin.
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(_) => debug!("Decodificador del chat {} terminó ordenadamente", chat),
        Err(_) => {
            if let Err(e) = child.kill().await {
                warn!("⚠️ No se pudo matar el decodificador del chat {}: {}", chat, e);
            } else {
                debug!("Decodificador del chat {} forzado a terminar", chat);
            }
        }
    }
}

async fn remove_cache_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🗑️ Caché eliminada: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ No se pudo borrar {}: {}", path.display(), e),
    }
}
