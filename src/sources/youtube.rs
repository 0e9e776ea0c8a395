use async_process::{Command, Stdio};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{is_url, ResolveError, Resolved, StreamRef, TrackResolver};
use crate::audio::track::Track;

/// Máximo de extracciones simultáneas para evitar rate limiting
const MAX_CONCURRENT_EXTRACTIONS: usize = 3;

/// Resolver respaldado por yt-dlp
pub struct YtDlpResolver {
    rate_limiter: Semaphore,
    timeout: Duration,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    related: Option<Vec<RelatedEntry>>,
}

#[derive(Debug, Deserialize)]
struct RelatedEntry {
    url: Option<String>,
}

impl YtDlpResolver {
    pub fn new(timeout: Duration) -> Self {
        Self {
            rate_limiter: Semaphore::new(MAX_CONCURRENT_EXTRACTIONS),
            timeout,
        }
    }

    /// Las búsquedas de texto libre usan el primer resultado
    fn target_for(query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            format!("ytsearch1:{}", query)
        }
    }

    async fn run_ytdlp(&self, query: &str) -> Result<String, ResolveError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::Extractor {
                query: query.to_string(),
                message: e.to_string(),
            })?;

        let target = Self::target_for(query);
        debug!("📊 Ejecutando yt-dlp para: {}", target);

        let output = Command::new("yt-dlp")
            .args([
                "--no-playlist",
                "--dump-json",
                "--no-warnings",
                "--quiet",
                "-f",
                "bestaudio/best",
                target.as_str(),
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolveError::Extractor {
                query: query.to_string(),
                message: format!("Error al ejecutar yt-dlp: {}", e),
            })?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Extractor {
                query: query.to_string(),
                message: error.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_output(query: &str, stdout: &str) -> Result<Resolved, ResolveError> {
        let info = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .find_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .ok_or_else(|| ResolveError::NotFound(query.to_string()))?;

        let stream = info
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ResolveError::NotFound(query.to_string()))?;
        let reference = info.webpage_url.unwrap_or_else(|| query.to_string());

        let mut track = Track::new(
            info.title.unwrap_or_else(|| "Título desconocido".to_string()),
            reference,
        )
        .with_duration_secs(info.duration.map(|d| d.max(0.0) as u64).unwrap_or(0))
        .with_related(
            info.related
                .unwrap_or_default()
                .into_iter()
                .filter_map(|r| r.url)
                .collect(),
        );

        if let Some(uploader) = info.uploader {
            track = track.with_uploader(uploader);
        }
        if let Some(thumbnail) = info.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }

        Ok(Resolved {
            track,
            stream: StreamRef(stream),
        })
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Resolved, ResolveError> {
        info!("🔍 Resolviendo: {}", query);

        let stdout = tokio::time::timeout(self.timeout, self.run_ytdlp(query))
            .await
            .map_err(|_| {
                warn!("⏰ Timeout resolviendo: {}", query);
                ResolveError::Timeout(query.to_string())
            })??;

        Self::parse_output(query, &stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_prefix_only_for_free_text() {
        assert_eq!(YtDlpResolver::target_for("river leon"), "ytsearch1:river leon");
        assert_eq!(
            YtDlpResolver::target_for("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_parse_output_builds_track() {
        let line = r#"{"id":"abc","title":"River","duration":242.6,"uploader":"Leon Bridges","thumbnail":"https://i.ytimg.com/abc.jpg","webpage_url":"https://www.youtube.com/watch?v=abc","url":"https://rr1.googlevideo.com/stream","related":[{"url":"https://www.youtube.com/watch?v=def"}]}"#;

        let resolved = YtDlpResolver::parse_output("river", line).unwrap();
        assert_eq!(resolved.track.title(), "River");
        assert_eq!(resolved.track.duration_secs(), 242);
        assert_eq!(resolved.track.uploader(), Some("Leon Bridges"));
        assert_eq!(
            resolved.track.source_reference(),
            "https://www.youtube.com/watch?v=abc"
        );
        assert_eq!(resolved.track.related(), ["https://www.youtube.com/watch?v=def"]);
        assert_eq!(resolved.stream.as_str(), "https://rr1.googlevideo.com/stream");
    }

    #[test]
    fn test_parse_output_without_stream_is_not_found() {
        let line = r#"{"title":"River","webpage_url":"https://www.youtube.com/watch?v=abc"}"#;
        assert_eq!(
            YtDlpResolver::parse_output("river", line).unwrap_err(),
            ResolveError::NotFound("river".into())
        );
        assert_eq!(
            YtDlpResolver::parse_output("river", "").unwrap_err(),
            ResolveError::NotFound("river".into())
        );
    }
}
