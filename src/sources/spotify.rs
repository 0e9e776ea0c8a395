use async_trait::async_trait;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ExpansionError, PlaylistExpander};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Clases de enlace que sabemos expandir
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Track,
    Album,
    Playlist,
}

/// Parses `open.spotify.com/{kind}/{id}` links and `spotify:{kind}:{id}` URIs.
pub fn parse_link(url: &str) -> Option<(LinkKind, String)> {
    static LINK: OnceLock<Regex> = OnceLock::new();
    let regex = LINK.get_or_init(|| {
        Regex::new(
            r"(?:open\.spotify\.com/(?:intl-[A-Za-z-]+/)?|spotify:)(track|album|playlist)[/:]([A-Za-z0-9]+)",
        )
        .expect("valid spotify link regex")
    });

    let caps = regex.captures(url.trim())?;
    let kind = match &caps[1] {
        "track" => LinkKind::Track,
        "album" => LinkKind::Album,
        _ => LinkKind::Playlist,
    };
    Some((kind, caps[2].to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CatalogTrack {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
}

impl CatalogTrack {
    /// "Artist A, Artist B - Title"
    fn search_query(&self) -> String {
        let artists = self
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} - {}", artists, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<CatalogTrack>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    next: Option<String>,
}

/// Cliente de la Web API de Spotify (client credentials)
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, ExpansionError> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() {
                return Ok(current.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(api_error)?
            .json()
            .await
            .map_err(api_error)?;

        // Renovar un minuto antes de que expire
        let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
        let value = response.access_token;
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ExpansionError> {
        let token = self.access_token().await?;
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(api_error)?
            .json()
            .await
            .map_err(api_error)
    }

    /// Sigue las páginas `next` hasta llegar al límite
    async fn collect_pages<T, F>(
        &self,
        first_url: String,
        limit: usize,
        to_query: F,
    ) -> Result<Vec<String>, ExpansionError>
    where
        T: DeserializeOwned,
        F: Fn(T) -> Option<String>,
    {
        let mut queries = Vec::new();
        let mut next = Some(first_url);

        while let Some(url) = next.take() {
            let page: Page<T> = self.get(&url).await?;
            queries.extend(page.items.into_iter().filter_map(&to_query));
            if queries.len() >= limit {
                queries.truncate(limit);
                break;
            }
            next = page.next;
        }

        Ok(queries)
    }
}

#[async_trait]
impl PlaylistExpander for SpotifyClient {
    fn is_supported(&self, url: &str) -> bool {
        url.contains("open.spotify.com") || url.trim_start().starts_with("spotify:")
    }

    async fn expand(&self, url: &str, limit: usize) -> Result<Vec<String>, ExpansionError> {
        let (kind, id) =
            parse_link(url).ok_or_else(|| ExpansionError::Unsupported(url.to_string()))?;
        info!("📋 Expandiendo enlace de Spotify {:?} {}", kind, id);

        let queries = match kind {
            LinkKind::Track => {
                let track: CatalogTrack = self.get(&format!("{}/tracks/{}", API_BASE, id)).await?;
                vec![track.search_query()]
            }
            LinkKind::Album => {
                self.collect_pages(
                    format!("{}/albums/{}/tracks?limit=50", API_BASE, id),
                    limit,
                    |track: CatalogTrack| Some(track.search_query()),
                )
                .await?
            }
            LinkKind::Playlist => {
                self.collect_pages(
                    format!("{}/playlists/{}/tracks?limit=100", API_BASE, id),
                    limit,
                    |item: PlaylistItem| item.track.map(|t| t.search_query()),
                )
                .await?
            }
        };

        if queries.is_empty() {
            warn!("⚠️ El enlace {} no contiene canciones", url);
        }
        Ok(queries.into_iter().take(limit).collect())
    }
}

fn api_error(err: reqwest::Error) -> ExpansionError {
    ExpansionError::Api(err.to_string())
}
