use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::settings::{Settings, MAX_DURATION_RANGE, QUEUE_CAP_RANGE, VOTE_THRESHOLD_RANGE};
use crate::types::UserId;

/// Backend que implementa las llamadas de voz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallBackend {
    DryRun,
    Bridge,
}

impl FromStr for CallBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dry-run" | "dryrun" | "dry_run" => Ok(CallBackend::DryRun),
            "bridge" => Ok(CallBackend::Bridge),
            other => anyhow::bail!("CALL_BACKEND desconocido: '{other}' (dry-run | bridge)"),
        }
    }
}

impl fmt::Display for CallBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallBackend::DryRun => f.write_str("dry-run"),
            CallBackend::Bridge => f.write_str("bridge"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub ytdlp_path: PathBuf,

    // Llamadas
    pub call_backend: CallBackend,
    pub bridge_command: Option<String>,
    pub bridge_timeout: Duration,
    pub local_decode: bool,

    // Valores por defecto de cada chat
    pub default_max_duration: u64, // En segundos
    pub default_queue_cap: usize,
    pub default_vote_threshold: usize,

    // Inactividad
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep_jitter: Duration,
    pub sweep_backoff: Duration,

    // Cachés
    pub settings_ttl: Duration,
    pub resolve_cache_ttl: Duration,

    // Arranque de streams
    pub stream_warmup: Duration,
    pub join_settle: Duration,
    pub start_retries: u32,
    pub retry_backoff: Duration,

    // Permisos e instancia
    pub sudo_users: Vec<UserId>,
    pub instance_id: String,
    pub lease_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup, falling back to
    /// [`Config::default`] for every missing or blank key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let duration = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => parse_duration(&raw).with_context(|| format!("{key} inválido: '{raw}'")),
                None => Ok(default),
            }
        };

        fn parsed<T>(value: Option<String>, key: &str, default: T) -> Result<T>
        where
            T: FromStr,
            T::Err: fmt::Display,
        {
            match value {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{key} inválido: '{raw}': {e}")),
                None => Ok(default),
            }
        }

        let sudo_users = match get("SUDO_USERS") {
            Some(raw) => parse_user_list(&raw)?,
            None => defaults.sudo_users.clone(),
        };

        Ok(Self {
            data_dir: get("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            cache_dir: get("CACHE_DIR").map_or(defaults.cache_dir, PathBuf::from),
            ffmpeg_path: get("FFMPEG_PATH").map_or(defaults.ffmpeg_path, PathBuf::from),
            ytdlp_path: get("YTDLP_PATH").map_or(defaults.ytdlp_path, PathBuf::from),

            call_backend: parsed(get("CALL_BACKEND"), "CALL_BACKEND", defaults.call_backend)?,
            bridge_command: get("BRIDGE_COMMAND").or(defaults.bridge_command),
            bridge_timeout: duration("BRIDGE_TIMEOUT", defaults.bridge_timeout)?,
            local_decode: parsed(get("LOCAL_DECODE"), "LOCAL_DECODE", defaults.local_decode)?,

            default_max_duration: parsed(
                get("DEFAULT_MAX_DURATION"),
                "DEFAULT_MAX_DURATION",
                defaults.default_max_duration,
            )?,
            default_queue_cap: parsed(get("DEFAULT_QUEUE_CAP"), "DEFAULT_QUEUE_CAP", defaults.default_queue_cap)?,
            default_vote_threshold: parsed(
                get("DEFAULT_VOTE_THRESHOLD"),
                "DEFAULT_VOTE_THRESHOLD",
                defaults.default_vote_threshold,
            )?,

            idle_timeout: duration("IDLE_TIMEOUT", defaults.idle_timeout)?,
            sweep_interval: duration("SWEEP_INTERVAL", defaults.sweep_interval)?,
            sweep_jitter: duration("SWEEP_JITTER", defaults.sweep_jitter)?,
            sweep_backoff: duration("SWEEP_BACKOFF", defaults.sweep_backoff)?,

            settings_ttl: duration("SETTINGS_TTL", defaults.settings_ttl)?,
            resolve_cache_ttl: duration("RESOLVE_CACHE_TTL", defaults.resolve_cache_ttl)?,

            stream_warmup: duration("STREAM_WARMUP", defaults.stream_warmup)?,
            join_settle: duration("JOIN_SETTLE", defaults.join_settle)?,
            start_retries: parsed(get("START_RETRIES"), "START_RETRIES", defaults.start_retries)?,
            retry_backoff: duration("RETRY_BACKOFF", defaults.retry_backoff)?,

            sudo_users,
            instance_id: get("INSTANCE_ID").unwrap_or(defaults.instance_id),
            lease_ttl: duration("LEASE_TTL", defaults.lease_ttl)?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Per-chat defaults must sit inside the ranges admins can set
    /// - The bridge backend needs `BRIDGE_COMMAND`
    /// - Timers must be non-zero, and the lease must outlive its renewal period
    pub fn validate(&self) -> Result<()> {
        let in_range = |value: u64, (min, max): (u64, u64)| (min..=max).contains(&value);

        if !in_range(self.default_max_duration, MAX_DURATION_RANGE) {
            anyhow::bail!(
                "DEFAULT_MAX_DURATION debe estar entre {} y {}, recibido: {}",
                MAX_DURATION_RANGE.0,
                MAX_DURATION_RANGE.1,
                self.default_max_duration
            );
        }
        if !in_range(self.default_queue_cap as u64, QUEUE_CAP_RANGE) {
            anyhow::bail!(
                "DEFAULT_QUEUE_CAP debe estar entre {} y {}, recibido: {}",
                QUEUE_CAP_RANGE.0,
                QUEUE_CAP_RANGE.1,
                self.default_queue_cap
            );
        }
        if !in_range(self.default_vote_threshold as u64, VOTE_THRESHOLD_RANGE) {
            anyhow::bail!(
                "DEFAULT_VOTE_THRESHOLD debe estar entre {} y {}, recibido: {}",
                VOTE_THRESHOLD_RANGE.0,
                VOTE_THRESHOLD_RANGE.1,
                self.default_vote_threshold
            );
        }

        if self.call_backend == CallBackend::Bridge && self.bridge_command.is_none() {
            anyhow::bail!("CALL_BACKEND=bridge requiere BRIDGE_COMMAND");
        }

        if self.idle_timeout.is_zero() || self.sweep_interval.is_zero() {
            anyhow::bail!("IDLE_TIMEOUT y SWEEP_INTERVAL deben ser mayores que 0");
        }
        if self.sweep_jitter >= self.sweep_interval {
            anyhow::bail!("SWEEP_JITTER debe ser menor que SWEEP_INTERVAL");
        }
        if self.start_retries == 0 {
            anyhow::bail!("START_RETRIES debe ser al menos 1");
        }
        if self.lease_ttl < Duration::from_secs(3) {
            anyhow::bail!("LEASE_TTL debe ser de al menos 3s");
        }
        if self.instance_id.trim().is_empty() {
            anyhow::bail!("INSTANCE_ID no puede estar vacío");
        }

        Ok(())
    }

    /// Per-chat settings new chats start with.
    pub fn chat_defaults(&self) -> Settings {
        Settings {
            max_duration: self.default_max_duration,
            queue_cap: self.default_queue_cap,
            vote_skip_threshold: self.default_vote_threshold,
            ..Settings::default()
        }
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        let fmt = |d: Duration| humantime::format_duration(d).to_string();
        format!(
            "Config Summary:\n  \
            Instancia: {} (lease {})\n  \
            Llamadas: {} (decodificación local: {})\n  \
            Chats: cola {}, votos {}, duración máx {}s\n  \
            Inactividad: {} timeout, barrido cada {} ±{}\n  \
            Cachés: ajustes {}, resolución {}\n  \
            Sudoers: {}",
            self.instance_id,
            fmt(self.lease_ttl),
            self.call_backend,
            self.local_decode,
            self.default_queue_cap,
            self.default_vote_threshold,
            self.default_max_duration,
            fmt(self.idle_timeout),
            fmt(self.sweep_interval),
            fmt(self.sweep_jitter),
            fmt(self.settings_ttl),
            fmt(self.resolve_cache_ttl),
            self.sudo_users.len()
        )
    }
}

/// Default configuration values.
impl Default for Config {
    fn default() -> Self {
        let chat = Settings::default();
        Self {
            data_dir: "/app/data".into(),
            cache_dir: "/app/cache".into(),
            ffmpeg_path: "ffmpeg".into(),
            ytdlp_path: "yt-dlp".into(),

            call_backend: CallBackend::DryRun,
            bridge_command: None,
            bridge_timeout: Duration::from_secs(15),
            local_decode: false,

            default_max_duration: chat.max_duration,
            default_queue_cap: chat.queue_cap,
            default_vote_threshold: chat.vote_skip_threshold,

            idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            sweep_jitter: Duration::from_secs(10),
            sweep_backoff: Duration::from_secs(10),

            settings_ttl: Duration::from_secs(30),
            resolve_cache_ttl: Duration::from_secs(120),

            stream_warmup: Duration::from_millis(1500),
            join_settle: Duration::from_millis(1200),
            start_retries: 3,
            retry_backoff: Duration::from_secs(1),

            sudo_users: Vec::new(),
            instance_id: format!("tgvc-{}", std::process::id()),
            lease_ttl: Duration::from_secs(120),
        }
    }
}

/// `"10m"`, `"1500ms"`, `"1h 30m"` or plain seconds (`"600"`, `"1.5"`).
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return Ok(Duration::from_secs_f64(secs));
        }
    }
    Ok(humantime::parse_duration(raw)?)
}

fn parse_user_list(raw: &str) -> Result<Vec<UserId>> {
    raw.split([',', ' '])
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            part.trim()
                .parse()
                .with_context(|| format!("SUDO_USERS contiene un id inválido: '{part}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_pairs(&[]).unwrap();
        config.validate().unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.call_backend, CallBackend::DryRun);
        assert_eq!(config.chat_defaults(), Settings::default());
    }

    #[test]
    fn test_durations_accept_humantime_and_seconds() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("IDLE_TIMEOUT", "5m"),
            ("SUDO_USERS", "11, 22,33"),
            ("CALL_BACKEND", "bridge"),
            ("BRIDGE_COMMAND", "python3 bridge.py"),
            ("DEFAULT_QUEUE_CAP", "100"),
            ("SWEEP_INTERVAL", ""),
        ])
        .unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.sudo_users, vec![UserId(11), UserId(22), UserId(33)]);
        assert_eq!(config.call_backend, CallBackend::Bridge);
        assert_eq!(config.default_queue_cap, 100);
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(from_pairs(&[("START_RETRIES", "many")]).is_err());
        assert!(from_pairs(&[("SUDO_USERS", "1,abc")]).is_err());
        assert!(from_pairs(&[("CALL_BACKEND", "pytgcalls")]).is_err());

        let bridge_without_command = from_pairs(&[("CALL_BACKEND", "bridge")]).unwrap();
        assert!(bridge_without_command.validate().is_err());

        let tiny_cap = from_pairs(&[("DEFAULT_QUEUE_CAP", "5")]).unwrap();
        assert!(tiny_cap.validate().is_err());
    }
}
