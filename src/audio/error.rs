use thiserror::Error;

use crate::sources::ResolveError;

/// Errors surfaced by the playback coordinator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlayerError {
    #[error("queue is full (max {max} tracks)")]
    QueueFull { max: usize },

    #[error("no track found for `{query}`")]
    TrackNotFound { query: String },

    #[error("voice connection failed: {0}")]
    VoiceConnectFailed(String),

    #[error("requester is not in a voice channel")]
    NotInVoiceChannel,

    #[error("nothing is playing")]
    NotPlaying,

    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("index {index} out of range (queue has {len} tracks)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("volume {0}% is outside 0-200")]
    InvalidVolume(u32),

    #[error("playlist expansion failed: {0}")]
    PlaylistExpansion(String),

    #[error("player worker is not running")]
    WorkerUnavailable,
}

/// Error classes, used to decide how an error is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reported to the invoking user, no retry.
    User,
    /// Reported for direct actions, logged for autoplay.
    Resolution,
    /// Reported with guidance, never retried automatically.
    Connection,
    Internal,
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::QueueFull { .. }
            | PlayerError::NotInVoiceChannel
            | PlayerError::NotPlaying
            | PlayerError::InvalidTimestamp(_)
            | PlayerError::IndexOutOfRange { .. }
            | PlayerError::InvalidVolume(_) => ErrorKind::User,
            PlayerError::TrackNotFound { .. } | PlayerError::PlaylistExpansion(_) => {
                ErrorKind::Resolution
            }
            PlayerError::VoiceConnectFailed(_) => ErrorKind::Connection,
            PlayerError::WorkerUnavailable => ErrorKind::Internal,
        }
    }

    /// Mensaje para el usuario que invocó el comando
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::QueueFull { max } => {
                format!("❌ La cola está llena (máximo {} canciones)", max)
            }
            PlayerError::TrackNotFound { query } => {
                format!("❌ No se encontraron resultados para: {}", query)
            }
            PlayerError::VoiceConnectFailed(_) => {
                "❌ No pude conectarme al canal de voz. Verifica que tenga permisos de `Connect` y `Speak` e inténtalo de nuevo.".to_string()
            }
            PlayerError::NotInVoiceChannel => "❌ Debes estar en un canal de voz".to_string(),
            PlayerError::NotPlaying => "❌ No hay nada reproduciéndose actualmente".to_string(),
            PlayerError::InvalidTimestamp(ts) => {
                format!("❌ Formato de tiempo inválido: `{}` (usa 1:23 o 83)", ts)
            }
            PlayerError::IndexOutOfRange { len, .. } => {
                format!("❌ Índice inválido, la cola tiene {} canciones", len)
            }
            PlayerError::InvalidVolume(_) => "❌ El volumen debe estar entre 0 y 200".to_string(),
            PlayerError::PlaylistExpansion(e) => format!("❌ No se pudo cargar la playlist: {}", e),
            PlayerError::WorkerUnavailable => {
                "❌ El reproductor no está disponible, inténtalo de nuevo".to_string()
            }
        }
    }
}

impl From<ResolveError> for PlayerError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(query) => PlayerError::TrackNotFound { query },
            ResolveError::Timeout(query) => PlayerError::TrackNotFound { query },
            ResolveError::Extractor { query, .. } => PlayerError::TrackNotFound { query },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert_eq!(PlayerError::NotPlaying.kind(), ErrorKind::User);
        assert_eq!(PlayerError::QueueFull { max: 500 }.kind(), ErrorKind::User);
        assert_eq!(
            PlayerError::TrackNotFound { query: "x".into() }.kind(),
            ErrorKind::Resolution
        );
        assert_eq!(
            PlayerError::VoiceConnectFailed("timeout".into()).kind(),
            ErrorKind::Connection
        );
        assert_eq!(PlayerError::WorkerUnavailable.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_resolve_errors_map_to_not_found() {
        let err: PlayerError = ResolveError::Timeout("river".into()).into();
        assert_eq!(err, PlayerError::TrackNotFound { query: "river".into() });
    }
}
