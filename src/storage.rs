use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, warn};

use crate::audio::queue::Track;
use crate::settings::{SettingKey, SettingValue, Settings, SettingsStore};
use crate::types::ChatId;

/// Play history and counters.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayHistory: Send + Sync {
    async fn record_play(&self, chat: ChatId, track: &Track) -> Result<()>;

    /// Returns the counter after incrementing.
    async fn increment_play_counter(&self) -> Result<u64>;

    /// The last `limit` plays of the chat, oldest first.
    async fn recent_plays(&self, chat: ChatId, limit: usize) -> Result<Vec<PlayRecord>>;
}

/// Una línea del historial de un chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRecord {
    pub title: String,
    pub url: String,
    pub duration: u64,
    pub requested_by: i64,
    pub is_video: bool,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GlobalStats {
    total_plays: u64,
}

/// Manager de almacenamiento basado en archivos JSON
///
/// ```text
/// data_dir/
///   chats/chat_<id>.json      ajustes por chat
///   history/chat_<id>.jsonl   historial de reproducciones
///   stats.json                contadores globales
/// ```
pub struct JsonStorage {
    data_dir: PathBuf,
    defaults: Settings,
    write_lock: Mutex<()>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf, defaults: Settings) -> Result<Self> {
        fs::create_dir_all(data_dir.join("chats")).await?;
        fs::create_dir_all(data_dir.join("history")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self {
            data_dir,
            defaults,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn total_plays(&self) -> Result<u64> {
        Ok(self.load_stats().await?.total_plays)
    }

    /// Obtiene estadísticas de almacenamiento
    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let mut files = fs::read_dir(self.data_dir.join("chats")).await?;
        let mut chat_configs = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                chat_configs += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            chat_configs,
            total_plays: self.total_plays().await?,
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    // Métodos privados

    async fn read_settings_file(&self, chat: ChatId) -> Result<Option<Settings>> {
        match fs::read_to_string(self.settings_path(chat)).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_settings_file(&self, chat: ChatId, settings: &Settings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.settings_path(chat), content).await?;
        Ok(())
    }

    async fn load_stats(&self) -> Result<GlobalStats> {
        match fs::read_to_string(self.stats_path()).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GlobalStats::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn settings_path(&self, chat: ChatId) -> PathBuf {
        self.data_dir.join("chats").join(format!("chat_{}.json", chat.0))
    }

    fn history_path(&self, chat: ChatId) -> PathBuf {
        self.data_dir.join("history").join(format!("chat_{}.jsonl", chat.0))
    }

    fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }
}

#[async_trait]
impl SettingsStore for JsonStorage {
    async fn load_settings(&self, chat: ChatId) -> Result<Settings> {
        if let Some(settings) = self.read_settings_file(chat).await? {
            return Ok(settings);
        }

        let _guard = self.write_lock.lock().await;
        // Otro escritor pudo crearlo mientras esperábamos
        if let Some(settings) = self.read_settings_file(chat).await? {
            return Ok(settings);
        }
        self.write_settings_file(chat, &self.defaults).await?;
        info!("📝 Ajustes por defecto creados para chat {}", chat);
        Ok(self.defaults.clone())
    }

    async fn save_setting(&self, chat: ChatId, key: SettingKey, value: SettingValue) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self
            .read_settings_file(chat)
            .await?
            .unwrap_or_else(|| self.defaults.clone());
        settings.apply(key, value);
        self.write_settings_file(chat, &settings).await?;

        info!("💾 Ajuste {} actualizado para chat {}", key, chat);
        Ok(())
    }
}

#[async_trait]
impl PlayHistory for JsonStorage {
    async fn record_play(&self, chat: ChatId, track: &Track) -> Result<()> {
        let record = PlayRecord {
            title: track.title.clone(),
            url: track.url.clone(),
            duration: track.duration,
            requested_by: track.requested_by.0,
            is_video: track.is_video,
            played_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path(chat))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("📜 Historial chat {}: '{}'", chat, track.title);
        Ok(())
    }

    async fn increment_play_counter(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut stats = self.load_stats().await?;
        stats.total_plays += 1;
        fs::write(self.stats_path(), serde_json::to_string_pretty(&stats)?).await?;
        Ok(stats.total_plays)
    }

    async fn recent_plays(&self, chat: ChatId, limit: usize) -> Result<Vec<PlayRecord>> {
        let path = self.history_path(chat);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<PlayRecord> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Línea de historial inválida en {}: {}", path.display(), e);
                    None
                }
            })
            .collect();
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub chat_configs: usize,
    pub total_plays: u64,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage: {} | {} chats configurados | {} reproducciones | {:.2} KB",
            self.data_dir.display(),
            self.chat_configs,
            self.total_plays,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LoopMode;
    use crate::types::UserId;

    async fn storage() -> (tempfile::TempDir, JsonStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path().to_path_buf(), Settings::default())
            .await
            .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn test_first_read_creates_defaults() {
        let (dir, storage) = storage().await;
        let settings = storage.load_settings(ChatId(-1)).await.unwrap();

        assert_eq!(settings, Settings::default());
        assert!(dir.path().join("chats/chat_-1.json").exists());
    }

    #[tokio::test]
    async fn test_save_setting_persists() {
        let (_dir, storage) = storage().await;
        storage
            .save_setting(ChatId(5), SettingKey::LoopMode, SettingValue::Loop(LoopMode::Queue))
            .await
            .unwrap();
        storage
            .save_setting(ChatId(5), SettingKey::QueueCap, SettingValue::Int(80))
            .await
            .unwrap();

        let settings = storage.load_settings(ChatId(5)).await.unwrap();
        assert_eq!(settings.loop_mode, LoopMode::Queue);
        assert_eq!(settings.queue_cap, 80);
        assert!(!settings.autoplay);
    }

    #[tokio::test]
    async fn test_history_and_counter() {
        let (_dir, storage) = storage().await;
        for title in ["A", "B", "C"] {
            let track = Track::new(title, format!("https://x/{title}"), 60, UserId(9));
            storage.record_play(ChatId(3), &track).await.unwrap();
            storage.increment_play_counter().await.unwrap();
        }

        let recent = storage.recent_plays(ChatId(3), 2).await.unwrap();
        let titles: Vec<_> = recent.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "C"]);
        assert_eq!(storage.total_plays().await.unwrap(), 3);
        assert!(storage.recent_plays(ChatId(4), 5).await.unwrap().is_empty());

        let stats = storage.get_storage_stats().await.unwrap();
        assert_eq!(stats.total_plays, 3);
    }
}
