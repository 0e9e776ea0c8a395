use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub history_size: usize,

    // Playlists
    pub max_playlist_size: usize,
    pub playlist_concurrency: usize,

    // Timeouts (segundos)
    pub inactivity_timeout: u64,
    pub voice_connect_timeout: u64,
    pub voice_connect_ceiling: u64,
    pub resolve_timeout: u64,

    // Spotify (opcional, solo para expandir enlaces)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,

    // Features
    pub enable_autoplay: bool,
}

/// Lee una variable de entorno o usa el valor por defecto
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: {}", key, value)),
        _ => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID no definido")?
                .parse()
                .context("APPLICATION_ID debe ser numérico")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            history_size: env_or("HISTORY_SIZE", defaults.history_size)?,

            // Playlists
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            playlist_concurrency: env_or("PLAYLIST_CONCURRENCY", defaults.playlist_concurrency)?,

            // Timeouts
            inactivity_timeout: env_or("INACTIVITY_TIMEOUT", defaults.inactivity_timeout)?,
            voice_connect_timeout: env_or("VOICE_CONNECT_TIMEOUT", defaults.voice_connect_timeout)?,
            voice_connect_ceiling: env_or("VOICE_CONNECT_CEILING", defaults.voice_connect_ceiling)?,
            resolve_timeout: env_or("RESOLVE_TIMEOUT", defaults.resolve_timeout)?,

            // Spotify
            spotify_client_id: env_opt("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: env_opt("SPOTIFY_CLIENT_SECRET"),

            // Features
            enable_autoplay: env_or("ENABLE_AUTOPLAY", defaults.enable_autoplay)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Queue, playlist and history sizes must be greater than 0
    /// - Timeouts must be greater than 0
    /// - The connect ceiling must not be shorter than the connect timeout
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_playlist_size == 0 || self.playlist_concurrency == 0 {
            anyhow::bail!("Playlist size and concurrency must be greater than 0");
        }

        if self.history_size == 0 {
            anyhow::bail!("History size must be greater than 0");
        }

        if self.inactivity_timeout == 0
            || self.voice_connect_timeout == 0
            || self.resolve_timeout == 0
        {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        if self.voice_connect_ceiling < self.voice_connect_timeout {
            anyhow::bail!(
                "Voice connect ceiling ({}s) cannot be shorter than the connect timeout ({}s)",
                self.voice_connect_ceiling,
                self.voice_connect_timeout
            );
        }

        Ok(())
    }

    /// Spotify credentials, only when both halves are present.
    pub fn spotify_credentials(&self) -> Option<(String, String)> {
        match (&self.spotify_client_id, &self.spotify_client_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), secret.clone())),
            _ => None,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the bot token and Spotify secret.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, {} queue, {} history\n  \
            Playlists: {} max, {} parallel\n  \
            Timeouts: {}s idle, {}s/{}s connect, {}s resolve\n  \
            Features: Autoplay={}, Spotify={}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.max_queue_size,
            self.history_size,
            self.max_playlist_size,
            self.playlist_concurrency,
            self.inactivity_timeout,
            self.voice_connect_timeout,
            self.voice_connect_ceiling,
            self.resolve_timeout,
            self.enable_autoplay,
            self.spotify_credentials().is_some()
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 0.5,
            max_queue_size: 500,
            history_size: 50,

            max_playlist_size: 100,
            playlist_concurrency: 3,

            inactivity_timeout: 300,  // 5 minutos
            voice_connect_timeout: 15,
            voice_connect_ceiling: 20,
            resolve_timeout: 30,

            spotify_client_id: None,
            spotify_client_secret: None,

            enable_autoplay: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let loud = Config {
            default_volume: 2.5,
            ..Default::default()
        };
        assert!(loud.validate().is_err());

        let no_queue = Config {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(no_queue.validate().is_err());

        let short_ceiling = Config {
            voice_connect_timeout: 15,
            voice_connect_ceiling: 10,
            ..Default::default()
        };
        assert!(short_ceiling.validate().is_err());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let config = Config {
            discord_token: "super-secret-token".into(),
            spotify_client_id: Some("id".into()),
            spotify_client_secret: Some("spotify-secret".into()),
            ..Default::default()
        };

        let summary = config.summary();
        assert!(!summary.contains("super-secret-token"));
        assert!(!summary.contains("spotify-secret"));
        assert!(summary.contains("Spotify=true"));
    }

    #[test]
    fn test_spotify_needs_both_credentials() {
        let half = Config {
            spotify_client_id: Some("id".into()),
            ..Default::default()
        };
        assert_eq!(half.spotify_credentials(), None);
    }
}
