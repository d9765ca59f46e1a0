use thiserror::Error;

use crate::settings::LoopMode;
use crate::types::UserId;

/// Cuántas entradas muestra /history por defecto
pub const HISTORY_DEFAULT: usize = 10;
const HISTORY_MAX: usize = 50;

/// A chat command, already split from its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play { query: String, video: bool, force: bool },
    Skip,
    Stop,
    Pause,
    Resume,
    Queue,
    NowPlaying,
    Shuffle,
    Remove { position: usize },
    Clear,
    Replay,
    Loop { mode: LoopMode },
    Autoplay { enabled: bool },
    Settings { change: Option<(String, String)> },
    History { limit: usize },
    Promote { user: UserId },
    Demote { user: UserId },
    Drain { enabled: bool },
    ForceLeave,
    Sessions,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Los comandos empiezan con /")]
    NotACommand,
    #[error("Comando desconocido: /{0}. Usa /help")]
    Unknown(String),
    #[error("Uso: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parses `/name args...`. A `@botname` suffix on the command is ignored.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim();
        let Some(body) = input.strip_prefix('/') else {
            return Err(ParseError::NotACommand);
        };

        let (head, rest) = match body.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (body, ""),
        };
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        let play = |video: bool, force: bool, usage: &'static str| {
            if rest.is_empty() {
                Err(ParseError::Usage(usage))
            } else {
                Ok(Command::Play {
                    query: rest.to_string(),
                    video,
                    force,
                })
            }
        };

        match name.as_str() {
            "play" | "p" => play(false, false, "/play <canción o URL>"),
            "playforce" => play(false, true, "/playforce <canción o URL>"),
            "vplay" => play(true, false, "/vplay <video o URL>"),
            "vplayforce" => play(true, true, "/vplayforce <video o URL>"),
            "skip" | "next" => Ok(Command::Skip),
            "stop" | "end" => Ok(Command::Stop),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "queue" | "q" => Ok(Command::Queue),
            "nowplaying" | "np" => Ok(Command::NowPlaying),
            "shuffle" => Ok(Command::Shuffle),
            "remove" => rest
                .parse::<usize>()
                .ok()
                .filter(|position| *position > 0)
                .map(|position| Command::Remove { position })
                .ok_or(ParseError::Usage("/remove <posición>")),
            "clear" => Ok(Command::Clear),
            "replay" => Ok(Command::Replay),
            "loop" => rest
                .parse()
                .map(|mode| Command::Loop { mode })
                .map_err(|_| ParseError::Usage("/loop off|track|queue")),
            "autoplay" => parse_switch(rest)
                .map(|enabled| Command::Autoplay { enabled })
                .ok_or(ParseError::Usage("/autoplay on|off")),
            "settings" => {
                if rest.is_empty() {
                    return Ok(Command::Settings { change: None });
                }
                match rest.split_once(char::is_whitespace) {
                    Some((key, value)) if !value.trim().is_empty() => Ok(Command::Settings {
                        change: Some((key.to_string(), value.trim().to_string())),
                    }),
                    _ => Err(ParseError::Usage("/settings [clave valor]")),
                }
            }
            "history" => {
                if rest.is_empty() {
                    return Ok(Command::History {
                        limit: HISTORY_DEFAULT,
                    });
                }
                rest.parse::<usize>()
                    .ok()
                    .filter(|limit| *limit > 0)
                    .map(|limit| Command::History {
                        limit: limit.min(HISTORY_MAX),
                    })
                    .ok_or(ParseError::Usage("/history [cantidad]"))
            }
            "promote" => rest
                .parse::<UserId>()
                .map(|user| Command::Promote { user })
                .map_err(|_| ParseError::Usage("/promote <user_id>")),
            "demote" => rest
                .parse::<UserId>()
                .map(|user| Command::Demote { user })
                .map_err(|_| ParseError::Usage("/demote <user_id>")),
            "drain" => parse_switch(rest)
                .map(|enabled| Command::Drain { enabled })
                .ok_or(ParseError::Usage("/drain on|off")),
            "forceleave" => Ok(Command::ForceLeave),
            "sessions" => Ok(Command::Sessions),
            "help" | "start" => Ok(Command::Help),
            _ => Err(ParseError::Unknown(name)),
        }
    }

    /// Operator commands; the console only runs them for sudo users.
    pub fn is_owner_only(&self) -> bool {
        matches!(
            self,
            Command::Promote { .. }
                | Command::Demote { .. }
                | Command::Drain { .. }
                | Command::ForceLeave
                | Command::Sessions
        )
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

pub const HELP: &str = "\
🎵 Comandos
/play <canción o URL>    reproduce o encola audio
/vplay <video o URL>     reproduce o encola video
/playforce, /vplayforce  reemplaza la cola (admins)
/skip                    vota para saltar (admins saltan directo)
/pause, /resume, /stop   controla la reproducción
/queue, /nowplaying      muestra la cola o la canción actual
/shuffle, /remove N      reordena o quita pendientes
/clear                   quita los pendientes (admins)
/replay                  reinicia la canción actual
/loop off|track|queue    modo de repetición (admins)
/autoplay on|off         canciones relacionadas al terminar (admins)
/settings [clave valor]  muestra o cambia ajustes (admins)
/history [N]             últimas reproducciones del chat";

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_play_variants() {
        assert_eq!(
            Command::parse("/play  never gonna give you up ").unwrap(),
            Command::Play {
                query: "never gonna give you up".into(),
                video: false,
                force: false
            }
        );
        assert_eq!(
            Command::parse("/vplayforce https://youtu.be/x").unwrap(),
            Command::Play {
                query: "https://youtu.be/x".into(),
                video: true,
                force: true
            }
        );
        assert_eq!(
            Command::parse("/play@TgvcBot song").unwrap(),
            Command::Play {
                query: "song".into(),
                video: false,
                force: false
            }
        );
        assert!(matches!(Command::parse("/play"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(Command::parse("/remove 3").unwrap(), Command::Remove { position: 3 });
        assert!(Command::parse("/remove 0").is_err());
        assert!(Command::parse("/remove x").is_err());

        assert_eq!(
            Command::parse("/loop queue").unwrap(),
            Command::Loop { mode: LoopMode::Queue }
        );
        assert_eq!(Command::parse("/autoplay ON").unwrap(), Command::Autoplay { enabled: true });
        assert_eq!(Command::parse("/drain off").unwrap(), Command::Drain { enabled: false });
        assert!(Command::parse("/loop forever").is_err());

        assert_eq!(Command::parse("/history").unwrap(), Command::History { limit: 10 });
        assert_eq!(Command::parse("/history 500").unwrap(), Command::History { limit: 50 });
        assert!(Command::parse("/history 0").is_err());

        assert_eq!(
            Command::parse("/promote 777").unwrap(),
            Command::Promote { user: UserId(777) }
        );
        assert_eq!(Command::parse("/demote 777").unwrap(), Command::Demote { user: UserId(777) });
        assert!(Command::parse("/promote").is_err());
    }

    #[test]
    fn test_parse_settings() {
        assert_eq!(Command::parse("/settings").unwrap(), Command::Settings { change: None });
        assert_eq!(
            Command::parse("/settings queue_cap 80").unwrap(),
            Command::Settings {
                change: Some(("queue_cap".into(), "80".into()))
            }
        );
        assert!(Command::parse("/settings queue_cap").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(Command::parse("hola"), Err(ParseError::NotACommand));
        assert_eq!(Command::parse("/dance"), Err(ParseError::Unknown("dance".into())));
    }

    #[test]
    fn test_owner_only() {
        assert!(Command::ForceLeave.is_owner_only());
        assert!(Command::Drain { enabled: true }.is_owner_only());
        assert!(Command::Promote { user: UserId(2) }.is_owner_only());
        assert!(!Command::History { limit: 5 }.is_owner_only());
        assert!(!Command::Skip.is_owner_only());
    }
}
