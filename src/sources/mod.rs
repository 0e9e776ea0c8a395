pub mod spotify;
pub mod youtube;

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::track::Track;

pub use spotify::SpotifyClient;
pub use youtube::YtDlpResolver;

/// Direct media URL for one playback. Expires, never stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRef(pub String);

impl StreamRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of a resolution: track metadata plus a fresh stream handle.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub track: Track,
    pub stream: StreamRef,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("no results for `{0}`")]
    NotFound(String),

    #[error("resolution of `{0}` timed out")]
    Timeout(String),

    #[error("extractor failed for `{query}`: {message}")]
    Extractor { query: String, message: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpansionError {
    #[error("unsupported playlist link: {0}")]
    Unsupported(String),

    #[error("playlist support is not configured")]
    NotConfigured,

    #[error("catalog API error: {0}")]
    Api(String),
}

/// Turns a free-text query or URL into a playable track.
///
/// Calls may be slow (network-bound); callers bound them with a timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Resolved, ResolveError>;
}

/// Expands a catalog link into ordered `"{artists} - {title}"` search queries.
#[async_trait]
pub trait PlaylistExpander: Send + Sync {
    /// Verifica si la URL es válida para esta fuente
    fn is_supported(&self, url: &str) -> bool;

    async fn expand(&self, url: &str, limit: usize) -> Result<Vec<String>, ExpansionError>;
}

/// True for anything that looks like an absolute http(s) URL.
pub fn is_url(query: &str) -> bool {
    url::Url::parse(query.trim())
        .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
        .unwrap_or(false)
}
