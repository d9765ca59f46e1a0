//! Media resolution.
//!
//! Turns a user query (search text or URL) into a [`TrackInfo`], and a
//! track's page URL into a locator the call backend can play directly.
//! Lookups are slow and may fail; implementors report "nothing found" as
//! `None` and log the cause.

pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio::queue::Track;
use crate::types::UserId;

pub use ytdlp::YtDlpResolver;

/// Substrings that mark a locator as already directly playable.
const DIRECT_STREAM_TOKENS: [&str; 9] = [
    "googlevideo.com",
    ".m3u8",
    ".mpd",
    ".flv",
    ".m4a",
    ".mp3",
    ".aac",
    ".ogg",
    ".opus",
];

/// Metadata returned by an extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    /// URL de la página; es lo que se guarda en la cola
    pub webpage_url: String,
    /// URL directa del medio, si la extracción la trajo
    pub stream_url: Option<String>,
    /// Segundos; 0 = en vivo o desconocido
    pub duration: u64,
    pub thumbnail: Option<String>,
    pub is_video: bool,
}

impl TrackInfo {
    pub fn into_track(self, requested_by: UserId) -> Track {
        Track::new(self.title, self.webpage_url, self.duration, requested_by).with_video(self.is_video)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Busca o extrae un track a partir de texto libre o una URL
    async fn extract_track(&self, query: &str, is_video: bool) -> Option<TrackInfo>;

    /// Devuelve un localizador reproducible para `locator`
    async fn resolve_stream_source(&self, locator: &str, is_video: bool) -> Option<String>;

    /// Un track relacionado con `seed_title`, para autoplay
    async fn related_track(&self, seed_title: &str, is_video: bool) -> Option<TrackInfo>;
}

pub fn is_direct_stream_url(url: &str) -> bool {
    let url = url.to_lowercase();
    DIRECT_STREAM_TOKENS.iter().any(|token| url.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_stream_detection() {
        assert!(is_direct_stream_url("https://rr3---sn.googlevideo.com/videoplayback?x=1"));
        assert!(is_direct_stream_url("https://radio.example/live.M3U8"));
        assert!(is_direct_stream_url("https://cdn.example/song.opus"));
        assert!(!is_direct_stream_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_direct_stream_url(""));
    }

    #[test]
    fn test_into_track_keeps_page_url() {
        let info = TrackInfo {
            title: "Song".into(),
            webpage_url: "https://www.youtube.com/watch?v=abc".into(),
            stream_url: Some("https://x.googlevideo.com/a".into()),
            duration: 215,
            thumbnail: None,
            is_video: true,
        };
        let track = info.into_track(UserId(7));
        assert_eq!(track.url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(track.duration, 215);
        assert!(track.is_video);
        assert_eq!(track.requested_by, UserId(7));
    }
}
