use std::time::Duration;

use crate::{
    audio::{
        player::{PlayOutcome, PlaybackState, SessionInfo, SkipOutcome},
        queue::Track,
    },
    error::PlaybackError,
    settings::{SettingKey, Settings},
    storage::PlayRecord,
};

/// Cuántas canciones se listan en /queue antes de resumir el resto
pub const QUEUE_PAGE: usize = 10;

const MAX_TITLE_CHARS: usize = 60;

/// `m:ss` o `h:mm:ss`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn track_length(track: &Track) -> String {
    if track.is_live() {
        "🔴 En vivo".to_string()
    } else {
        format_duration(Duration::from_secs(track.duration))
    }
}

fn short_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_CHARS {
        title.to_string()
    } else {
        let cut: String = title.chars().take(MAX_TITLE_CHARS - 1).collect();
        format!("{cut}…")
    }
}

fn media_icon(track: &Track) -> &'static str {
    if track.is_video {
        "🎬"
    } else {
        "🎵"
    }
}

pub fn now_playing(track: &Track, state: PlaybackState) -> String {
    let header = match state {
        PlaybackState::Playing => "Reproduciendo ahora",
        PlaybackState::Transitioning => "Cambiando de canción",
        PlaybackState::Stopped => "Deteniendo",
        PlaybackState::Idle => "En cola (sin llamada activa)",
    };
    format!(
        "{} {}\n**{}**\n⏱️ {} | 👤 {}\n🔗 {}",
        media_icon(track),
        header,
        short_title(&track.title),
        track_length(track),
        track.requested_by,
        track.url
    )
}

/// Listado de la cola: la cabeza es la que suena, el resto se numera desde 2.
pub fn queue_listing(tracks: &[Track], total: Duration) -> String {
    let Some((current, upcoming)) = tracks.split_first() else {
        return "📭 La cola está vacía".to_string();
    };

    let mut lines = vec![
        format!("📋 Cola ({} canciones, {})", tracks.len(), format_duration(total)),
        format!(
            "▶️ 1. {} [{}]",
            short_title(&current.title),
            track_length(current)
        ),
    ];

    for (index, track) in upcoming.iter().take(QUEUE_PAGE - 1).enumerate() {
        lines.push(format!(
            "{}. {} [{}]",
            index + 2,
            short_title(&track.title),
            track_length(track)
        ));
    }

    let hidden = tracks.len().saturating_sub(QUEUE_PAGE);
    if hidden > 0 {
        lines.push(format!("… y {} más", hidden));
    }

    lines.join("\n")
}

pub fn play_outcome(outcome: &PlayOutcome) -> String {
    match outcome {
        PlayOutcome::Started { track } => format!(
            "{} Reproduciendo: **{}** [{}]",
            media_icon(track),
            short_title(&track.title),
            track_length(track)
        ),
        PlayOutcome::Queued { track, position } => format!(
            "✅ Añadida a la cola en la posición #{}: **{}** [{}]",
            position + 1,
            short_title(&track.title),
            track_length(track)
        ),
    }
}

pub fn skip_outcome(outcome: &SkipOutcome) -> String {
    match outcome {
        SkipOutcome::Advanced { next } => {
            format!("⏭️ Saltada. Ahora: **{}**", short_title(&next.title))
        }
        SkipOutcome::QueueEnded => "⏭️ Saltada. La cola terminó".to_string(),
        SkipOutcome::Voted { votes, threshold } => {
            format!("🗳️ Voto registrado ({}/{})", votes, threshold)
        }
    }
}

pub fn error(err: &PlaybackError) -> String {
    if err.is_rejection() {
        format!("⛔ {}", err)
    } else {
        format!("❌ {}", err)
    }
}

pub fn settings_overview(settings: &Settings) -> String {
    let mut lines = vec!["⚙️ Ajustes del chat".to_string()];
    lines.extend(
        SettingKey::ALL
            .iter()
            .map(|key| format!("• {} = {}", key, settings.get(*key))),
    );
    lines.join("\n")
}

/// Most recent first; `records` comes oldest first, as storage returns it.
pub fn history(records: &[PlayRecord]) -> String {
    if records.is_empty() {
        return "📜 Todavía no se reprodujo nada en este chat".to_string();
    }

    let mut lines = vec![format!("📜 Últimas {} reproducciones", records.len())];
    for (i, record) in records.iter().rev().enumerate() {
        let length = if record.duration == 0 {
            "🔴 En vivo".to_string()
        } else {
            format_duration(Duration::from_secs(record.duration))
        };
        lines.push(format!(
            "{}. {}{} [{}] · {}",
            i + 1,
            if record.is_video { "🎬 " } else { "" },
            short_title(&record.title),
            length,
            record.played_at.format("%d/%m %H:%M")
        ));
    }
    lines.join("\n")
}

pub fn sessions_table(sessions: &[SessionInfo]) -> String {
    if sessions.is_empty() {
        return "💤 Sin sesiones activas".to_string();
    }

    let mut lines = vec![format!("🎧 Sesiones ({})", sessions.len())];
    for info in sessions {
        let idle = info
            .idle_for
            .map(|d| humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{} {} | {:?} | cola {} | ffmpeg {} | inactivo {}",
            if info.connected { "🟢" } else { "⚪" },
            info.chat,
            info.state,
            info.queue_size,
            if info.worker_running { "sí" } else { "no" },
            idle
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatId, UserId};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn track(title: &str, duration: u64) -> Track {
        Track::new(title, format!("https://x/{title}"), duration, UserId(1))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(212)), "3:32");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_queue_listing_numbers_from_head() {
        let tracks = vec![track("A", 60), track("B", 0)];
        let listing = queue_listing(&tracks, Duration::from_secs(60));
        assert_eq!(
            listing,
            "📋 Cola (2 canciones, 1:00)\n▶️ 1. A [1:00]\n2. B [🔴 En vivo]"
        );
        assert_eq!(queue_listing(&[], Duration::ZERO), "📭 La cola está vacía");
    }

    #[test]
    fn test_queue_listing_truncates() {
        let tracks: Vec<_> = (0..14).map(|i| track(&format!("T{i}"), 10)).collect();
        let listing = queue_listing(&tracks, Duration::from_secs(140));
        assert_eq!(listing.lines().count(), 1 + QUEUE_PAGE + 1);
        assert!(listing.ends_with("… y 4 más"));
    }

    #[test]
    fn test_outcomes() {
        let queued = PlayOutcome::Queued {
            track: track("B", 90),
            position: 2,
        };
        assert!(play_outcome(&queued).contains("posición #3"));

        let voted = SkipOutcome::Voted { votes: 1, threshold: 3 };
        assert_eq!(skip_outcome(&voted), "🗳️ Voto registrado (1/3)");

        assert!(error(&PlaybackError::Duplicate).starts_with("⛔"));
        assert!(error(&PlaybackError::Call("x".into())).starts_with("❌"));
    }

    #[test]
    fn test_long_titles_are_shortened() {
        let title = "x".repeat(100);
        let shortened = short_title(&title);
        assert_eq!(shortened.chars().count(), MAX_TITLE_CHARS);
        assert!(shortened.ends_with('…'));
    }

    #[test]
    fn test_sessions_table() {
        let rows = vec![SessionInfo {
            chat: ChatId(-5),
            connected: true,
            queue_size: 2,
            worker_running: false,
            idle_for: Some(Duration::from_secs(90)),
            state: PlaybackState::Playing,
        }];
        let table = sessions_table(&rows);
        assert!(table.contains("🟢 -5 | Playing | cola 2 | ffmpeg no | inactivo 1m 30s"));
        assert_eq!(sessions_table(&[]), "💤 Sin sesiones activas");
    }

    #[test]
    fn test_history_lists_newest_first() {
        let at = |hour: u32| chrono::Utc.with_ymd_and_hms(2024, 3, 9, hour, 5, 0).unwrap();
        let records = vec![
            PlayRecord {
                title: "Vieja".into(),
                url: "https://x/vieja".into(),
                duration: 200,
                requested_by: 7,
                is_video: false,
                played_at: at(10),
            },
            PlayRecord {
                title: "Nueva".into(),
                url: "https://x/nueva".into(),
                duration: 0,
                requested_by: 7,
                is_video: true,
                played_at: at(11),
            },
        ];

        assert_eq!(
            history(&records),
            "📜 Últimas 2 reproducciones\n1. 🎬 Nueva [🔴 En vivo] · 09/03 11:05\n2. Vieja [3:20] · 09/03 10:05"
        );
        assert_eq!(history(&[]), "📜 Todavía no se reprodujo nada en este chat");
    }
}
