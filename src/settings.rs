//! Per-chat music settings.
//!
//! [`Settings`] is the record admins tune per chat (loop mode, queue cap,
//! vote threshold, maximum duration...). Reads go through [`SettingsCache`],
//! which memoizes the persistent [`SettingsStore`] for a short TTL so hot
//! paths like skip and play don't hit storage on every command.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::types::ChatId;

pub const QUEUE_CAP_RANGE: (u64, u64) = (10, 200);
pub const VOTE_THRESHOLD_RANGE: (u64, u64) = (2, 10);
pub const MAX_DURATION_RANGE: (u64, u64) = (60, 10_800);
pub const VOLUME_RANGE: (u64, u64) = (1, 200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl FromStr for LoopMode {
    type Err = SettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(LoopMode::Off),
            "track" => Ok(LoopMode::Track),
            "queue" => Ok(LoopMode::Queue),
            _ => Err(SettingError::InvalidValue {
                key: SettingKey::LoopMode,
                expected: "off, track o queue",
            }),
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub autoplay: bool,
    pub loop_mode: LoopMode,
    pub queue_cap: usize,
    pub vote_skip_threshold: usize,
    /// Segundos
    pub max_duration: u64,
    pub default_volume: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autoplay: false,
            loop_mode: LoopMode::Off,
            queue_cap: 50,
            vote_skip_threshold: 3,
            max_duration: 3600,
            default_volume: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Autoplay,
    LoopMode,
    QueueCap,
    VoteSkipThreshold,
    MaxDuration,
    DefaultVolume,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::Autoplay,
        SettingKey::LoopMode,
        SettingKey::QueueCap,
        SettingKey::VoteSkipThreshold,
        SettingKey::MaxDuration,
        SettingKey::DefaultVolume,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Autoplay => "autoplay",
            SettingKey::LoopMode => "loop_mode",
            SettingKey::QueueCap => "queue_cap",
            SettingKey::VoteSkipThreshold => "vote_skip_threshold",
            SettingKey::MaxDuration => "max_duration",
            SettingKey::DefaultVolume => "default_volume",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated value for one [`SettingKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Loop(LoopMode),
    Int(u64),
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Loop(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingError {
    #[error("clave de ajuste desconocida: {0}")]
    UnknownKey(String),
    #[error("valor inválido para {key}: se esperaba {expected}")]
    InvalidValue {
        key: SettingKey,
        expected: &'static str,
    },
}

impl SettingValue {
    /// Parses raw admin input for `key`, clamping integers into their allowed range.
    pub fn parse(key: SettingKey, raw: &str) -> Result<Self, SettingError> {
        let raw = raw.trim().to_lowercase();
        match key {
            SettingKey::Autoplay => match raw.as_str() {
                "on" | "true" => Ok(SettingValue::Bool(true)),
                "off" | "false" => Ok(SettingValue::Bool(false)),
                _ => Err(SettingError::InvalidValue {
                    key,
                    expected: "on/off",
                }),
            },
            SettingKey::LoopMode => raw.parse().map(SettingValue::Loop),
            _ => {
                let value: u64 = raw.parse().map_err(|_| SettingError::InvalidValue {
                    key,
                    expected: "un entero",
                })?;
                let (min, max) = match key {
                    SettingKey::QueueCap => QUEUE_CAP_RANGE,
                    SettingKey::VoteSkipThreshold => VOTE_THRESHOLD_RANGE,
                    SettingKey::MaxDuration => MAX_DURATION_RANGE,
                    _ => VOLUME_RANGE,
                };
                Ok(SettingValue::Int(value.clamp(min, max)))
            }
        }
    }
}

impl Settings {
    /// Applies an already validated value. Mismatched value kinds are ignored.
    pub fn apply(&mut self, key: SettingKey, value: SettingValue) {
        match (key, value) {
            (SettingKey::Autoplay, SettingValue::Bool(v)) => self.autoplay = v,
            (SettingKey::LoopMode, SettingValue::Loop(v)) => self.loop_mode = v,
            (SettingKey::QueueCap, SettingValue::Int(v)) => self.queue_cap = v as usize,
            (SettingKey::VoteSkipThreshold, SettingValue::Int(v)) => {
                self.vote_skip_threshold = v as usize
            }
            (SettingKey::MaxDuration, SettingValue::Int(v)) => self.max_duration = v,
            (SettingKey::DefaultVolume, SettingValue::Int(v)) => self.default_volume = v as u32,
            (key, value) => warn!("⚠️ Valor {:?} no corresponde a la clave {}", value, key),
        }
    }

    pub fn get(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::Autoplay => SettingValue::Bool(self.autoplay),
            SettingKey::LoopMode => SettingValue::Loop(self.loop_mode),
            SettingKey::QueueCap => SettingValue::Int(self.queue_cap as u64),
            SettingKey::VoteSkipThreshold => SettingValue::Int(self.vote_skip_threshold as u64),
            SettingKey::MaxDuration => SettingValue::Int(self.max_duration),
            SettingKey::DefaultVolume => SettingValue::Int(self.default_volume as u64),
        }
    }
}

/// Persistent backing store for chat settings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns the chat's settings, creating defaults on first read.
    async fn load_settings(&self, chat: ChatId) -> Result<Settings>;

    async fn save_setting(&self, chat: ChatId, key: SettingKey, value: SettingValue) -> Result<()>;
}

/// Read-through cache over a [`SettingsStore`].
pub struct SettingsCache {
    store: Arc<dyn SettingsStore>,
    cache: TtlCache<ChatId, Settings>,
    defaults: Settings,
}

impl SettingsCache {
    pub fn new(store: Arc<dyn SettingsStore>, ttl: Duration) -> Self {
        Self::with_defaults(store, ttl, Settings::default())
    }

    /// `defaults` is what callers get when the store cannot be read.
    pub fn with_defaults(store: Arc<dyn SettingsStore>, ttl: Duration, defaults: Settings) -> Self {
        Self {
            store,
            cache: TtlCache::new(ttl),
            defaults,
        }
    }

    /// Returns the chat's settings. Store failures fall back to defaults
    /// without caching them, so the next read retries the store.
    pub async fn get(&self, chat: ChatId) -> Settings {
        if let Some(settings) = self.cache.get(&chat) {
            return settings;
        }

        match self.store.load_settings(chat).await {
            Ok(settings) => {
                self.cache.insert(chat, settings.clone());
                settings
            }
            Err(e) => {
                warn!("⚠️ No se pudieron leer los ajustes del chat {}: {:?}", chat, e);
                self.defaults.clone()
            }
        }
    }

    /// Writes through to the store, then refreshes the cached entry.
    pub async fn set(&self, chat: ChatId, key: SettingKey, value: SettingValue) -> Result<Settings> {
        self.store.save_setting(chat, key, value).await?;
        self.invalidate(chat);

        let mut settings = self.get(chat).await;
        // El store puede ser eventual; el valor escrito manda.
        settings.apply(key, value);
        self.cache.insert(chat, settings.clone());

        info!("⚙️ Chat {}: {} = {}", chat, key, value);
        Ok(settings)
    }

    pub fn invalidate(&self, chat: ChatId) {
        if self.cache.invalidate(&chat) {
            debug!("Caché de ajustes invalidada para chat {}", chat);
        }
    }
}
