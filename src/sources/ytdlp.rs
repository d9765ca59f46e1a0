use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{is_direct_stream_url, MediaResolver, TrackInfo};
use crate::cache::TtlCache;

const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio[acodec^=mp4a]/bestaudio/best";
const VIDEO_FORMAT: &str = "best[height<=360][vcodec!=none][acodec!=none]/best";

static NO_ENTRY: Value = Value::Null;

/// Resolver que invoca `yt-dlp` como proceso hijo
pub struct YtDlpResolver {
    program: PathBuf,
    cookies: Option<PathBuf>,
    socket_timeout: Duration,
    extract_cache: TtlCache<(String, bool), TrackInfo>,
    stream_cache: TtlCache<(String, bool), String>,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self {
            program: program.into(),
            cookies: None,
            socket_timeout: Duration::from_secs(30),
            extract_cache: TtlCache::new(cache_ttl),
            stream_cache: TtlCache::new(cache_ttl),
        }
    }

    pub fn with_cookies(mut self, cookies: Option<PathBuf>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Busca un archivo de cookies en las ubicaciones habituales
    pub async fn find_cookies_file(data_dir: &std::path::Path) -> Option<PathBuf> {
        let mut candidates = vec![data_dir.join("cookies.txt")];
        if let Ok(home) = std::env::var("HOME") {
            candidates.push(PathBuf::from(home).join(".config/yt-dlp/cookies.txt"));
        }
        candidates.push(PathBuf::from("./cookies.txt"));

        for path in candidates {
            if tokio::fs::metadata(&path).await.is_ok() {
                info!("🍪 Cookies encontradas en: {}", path.display());
                return Some(path);
            }
        }

        debug!("🍪 Sin archivo de cookies para yt-dlp");
        None
    }

    /// Limpia entradas vencidas de ambos cachés
    pub fn cleanup_caches(&self) -> usize {
        self.extract_cache.cleanup_expired() + self.stream_cache.cleanup_expired()
    }

    /// Periodically drops expired lookups so entries nobody asks for again
    /// do not pile up. Stops when `shutdown` fires.
    pub fn spawn_cache_janitor(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.cleanup_caches();
                        if removed > 0 {
                            debug!("🧹 {} resoluciones vencidas descartadas", removed);
                        }
                    }
                }
            }
            debug!("Limpieza del caché de resoluciones detenida");
        })
    }

    fn base_args(&self, is_video: bool) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--dump-single-json".into(),
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--quiet".into(),
            "--no-cache-dir".into(),
            "--socket-timeout".into(),
            self.socket_timeout.as_secs().to_string(),
            "-f".into(),
            format_for(is_video).into(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".into());
            args.push(cookies.display().to_string());
        }
        args
    }

    async fn dump_json(&self, target: &str, is_video: bool) -> Result<Value> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.base_args(is_video))
            .arg(target)
            .kill_on_drop(true);

        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp falló: {}", stderr.trim());
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn run_extraction(&self, target: &str, fallback_url: &str, is_video: bool) -> Option<TrackInfo> {
        match self.dump_json(target, is_video).await {
            Ok(json) => {
                let info = parse_track_info(&json, fallback_url, is_video);
                if info.is_none() {
                    warn!("⚠️ yt-dlp no devolvió resultados para '{}'", target);
                }
                info
            }
            Err(e) => {
                error!("❌ Error de extracción para '{}': {}", target, e);
                None
            }
        }
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn extract_track(&self, query: &str, is_video: bool) -> Option<TrackInfo> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        let key = (query.to_lowercase(), is_video);
        if let Some(hit) = self.extract_cache.get(&key) {
            debug!("🎯 Caché de extracción: '{}'", query);
            return Some(hit);
        }

        let target = if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch:{query}")
        };

        let info = self.run_extraction(&target, query, is_video).await?;
        info!("🔍 Extraído '{}' ({}s)", info.title, info.duration);
        self.extract_cache.insert(key, info.clone());
        Some(info)
    }

    async fn resolve_stream_source(&self, locator: &str, is_video: bool) -> Option<String> {
        if locator.is_empty() {
            return None;
        }
        if is_direct_stream_url(locator) {
            return Some(locator.to_string());
        }

        let key = (locator.to_string(), is_video);
        if let Some(hit) = self.stream_cache.get(&key) {
            return Some(hit);
        }

        let direct = match self.dump_json(locator, is_video).await {
            Ok(json) => first_entry(&json)
                .get("url")
                .and_then(Value::as_str)
                .map(str::to_string),
            Err(e) => {
                warn!("⚠️ No se pudo resolver el stream de {}: {}", locator, e);
                None
            }
        };

        match direct {
            Some(direct) => {
                self.stream_cache.insert(key, direct.clone());
                Some(direct)
            }
            // Sin URL directa se intenta con la original
            None => Some(locator.to_string()),
        }
    }

    async fn related_track(&self, seed_title: &str, is_video: bool) -> Option<TrackInfo> {
        let seed = seed_title.trim();
        if seed.is_empty() {
            return None;
        }
        let target = format!("ytsearch1:{seed} related");
        let info = self.run_extraction(&target, "", is_video).await?;
        info!("📻 Autoplay encontró '{}' a partir de '{}'", info.title, seed);
        Some(info)
    }
}

fn format_for(is_video: bool) -> &'static str {
    if is_video {
        VIDEO_FORMAT
    } else {
        AUDIO_FORMAT
    }
}

fn is_url(query: &str) -> bool {
    url::Url::parse(query).is_ok_and(|url| matches!(url.scheme(), "http" | "https"))
}

/// Search results come wrapped in `entries`; single videos do not.
fn first_entry(json: &Value) -> &Value {
    match json.get("entries").and_then(Value::as_array) {
        Some(entries) => entries.first().unwrap_or(&NO_ENTRY),
        None => json,
    }
}

fn parse_track_info(json: &Value, fallback_url: &str, is_video: bool) -> Option<TrackInfo> {
    let entry = first_entry(json);
    if entry.is_null() {
        return None;
    }

    let text = |field: &str| entry.get(field).and_then(Value::as_str).map(str::to_string);
    let webpage_url = text("webpage_url")
        .or_else(|| text("original_url"))
        .or_else(|| text("url"))
        .unwrap_or_else(|| fallback_url.to_string());
    if webpage_url.is_empty() {
        return None;
    }

    Some(TrackInfo {
        title: text("title").unwrap_or_else(|| "Unknown".to_string()),
        webpage_url,
        stream_url: text("url"),
        duration: entry
            .get("duration")
            .and_then(Value::as_f64)
            .map_or(0, |secs| secs.max(0.0) as u64),
        thumbnail: text("thumbnail"),
        is_video,
    })
}
