//! Error taxonomy for playback operations.
//!
//! Every variant renders as the short message shown to whoever issued the
//! command; the detailed cause is logged where the error is produced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// La extracción o resolución del medio no devolvió nada.
    #[error("No se encontró el medio solicitado")]
    Resolution,

    #[error("Demasiado largo (máximo {max_minutes}m)")]
    TooLong { max_minutes: u64 },

    #[error("La cola está llena (máximo {cap} canciones)")]
    QueueFull { cap: usize },

    #[error("Esta canción ya está en la cola")]
    Duplicate,

    #[error("Las peticiones de reproducción están pausadas temporalmente (modo drenaje)")]
    Draining,

    #[error("Solo administradores")]
    NotPrivileged,

    /// Join/start agotó los reintentos; lleva el mensaje del backend de llamadas.
    #[error("Fallo del stream: {0}")]
    Call(String),

    /// No se pudo lanzar el proceso de decodificación local.
    #[error("No se pudo iniciar el decodificador: {0}")]
    Worker(String),

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("Posición inválida. No puedes quitar la #1 (la que suena ahora)")]
    InvalidPosition,

    #[error("Ajuste inválido: {0}")]
    InvalidSetting(String),

    #[error("Error de almacenamiento: {0}")]
    Storage(String),
}

impl PlaybackError {
    /// Maps an opaque call-backend failure to a message a chat admin can act on.
    pub fn from_call_error(err: &anyhow::Error) -> Self {
        let raw = err.to_string();
        let low = raw.to_lowercase();

        let message = if low.contains("groupcall")
            && (low.contains("invalid") || low.contains("forbidden") || low.contains("not"))
        {
            "No hay un chat de voz activo. Inicia el chat de voz en el grupo primero.".to_string()
        } else if low.contains("chat admin required") || low.contains("right") {
            "El bot no tiene los permisos de administrador necesarios para el chat de voz."
                .to_string()
        } else if low.contains("peer id invalid") || low.contains("peer_id_invalid") {
            "El asistente no está en este grupo.".to_string()
        } else {
            raw.chars().take(180).collect()
        };

        PlaybackError::Call(message)
    }

    /// `true` for failures caused by the request itself rather than the backend.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PlaybackError::TooLong { .. }
                | PlaybackError::QueueFull { .. }
                | PlaybackError::Duplicate
                | PlaybackError::Draining
                | PlaybackError::NotPrivileged
                | PlaybackError::InvalidPosition
                | PlaybackError::InvalidSetting(_)
        )
    }
}
