use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::player::PlayerEvent;
use crate::sources::StreamRef;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VoiceError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("playback control failed: {0}")]
    Playback(String),
}

/// Posts the end of one stream back into the guild worker.
///
/// Consumed on use, so a stream reports completion at most once.
#[derive(Debug)]
pub struct CompletionNotifier {
    play_id: u64,
    tx: mpsc::UnboundedSender<PlayerEvent>,
}

impl CompletionNotifier {
    pub(crate) fn new(play_id: u64, tx: mpsc::UnboundedSender<PlayerEvent>) -> Self {
        Self { play_id, tx }
    }

    pub fn notify(self, error: Option<String>) {
        // El worker puede haber terminado (guild abandonada)
        let _ = self.tx.send(PlayerEvent::TrackEnded {
            play_id: self.play_id,
            error,
        });
    }
}

/// One `play` call against the voice connection.
#[derive(Debug)]
pub struct PlayRequest {
    pub stream: StreamRef,
    pub start_offset: Option<Duration>,
    pub volume: f32,
    pub completion: CompletionNotifier,
}

/// Voice connection capability consumed by the playback coordinator.
///
/// One adapter per guild. Completion of a stream started with `play`,
/// natural or forced by `stop`, is reported through the request's
/// [`CompletionNotifier`].
#[async_trait]
pub trait VoiceAdapter: Send + Sync {
    async fn connect(&self, channel: ChannelId, timeout: Duration) -> Result<(), VoiceError>;
    async fn disconnect(&self) -> Result<(), VoiceError>;
    async fn current_channel(&self) -> Option<ChannelId>;

    async fn play(&self, request: PlayRequest) -> Result<(), VoiceError>;
    async fn pause(&self) -> Result<(), VoiceError>;
    async fn resume(&self) -> Result<(), VoiceError>;
    async fn stop(&self) -> Result<(), VoiceError>;
    async fn set_volume(&self, volume: f32) -> Result<(), VoiceError>;

    async fn is_connected(&self) -> bool;
    async fn is_playing(&self) -> bool;
    async fn is_paused(&self) -> bool;
}

/// Builds the voice adapter for a guild.
pub trait VoiceProvider: Send + Sync {
    fn voice_for(&self, guild_id: GuildId) -> Arc<dyn VoiceAdapter>;
}

/// Provider backed by the process-wide songbird manager
pub struct SongbirdProvider {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdProvider {
    pub fn new(manager: Arc<Songbird>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { manager, http }
    }
}

impl VoiceProvider for SongbirdProvider {
    fn voice_for(&self, guild_id: GuildId) -> Arc<dyn VoiceAdapter> {
        Arc::new(SongbirdVoice {
            manager: self.manager.clone(),
            guild_id,
            http: self.http.clone(),
            track: Mutex::new(None),
        })
    }
}

pub struct SongbirdVoice {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    http: reqwest::Client,
    track: Mutex<Option<TrackHandle>>,
}

impl SongbirdVoice {
    fn current_track(&self) -> Option<TrackHandle> {
        self.track.lock().clone()
    }

    async fn play_mode(&self) -> Option<PlayMode> {
        let handle = self.current_track()?;
        handle.get_info().await.ok().map(|info| info.playing)
    }
}

#[async_trait]
impl VoiceAdapter for SongbirdVoice {
    async fn connect(&self, channel: ChannelId, timeout: Duration) -> Result<(), VoiceError> {
        info!("🔗 Conectando al canal {} en guild {}", channel, self.guild_id);

        let call = match tokio::time::timeout(timeout, self.manager.join(self.guild_id, channel)).await {
            Ok(Ok(call)) => call,
            Ok(Err(e)) => {
                let _ = self.manager.leave(self.guild_id).await;
                return Err(VoiceError::Connect(e.to_string()));
            }
            Err(_) => {
                let _ = self.manager.leave(self.guild_id).await;
                return Err(VoiceError::Timeout(timeout));
            }
        };

        let mut call = call.lock().await;
        if let Err(e) = call.deafen(true).await {
            debug!("No se pudo ensordecer al bot: {:?}", e);
        }

        info!("🔊 Conectado al canal de voz en guild {}", self.guild_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        if let Some(handle) = self.track.lock().take() {
            let _ = handle.stop();
        }

        match self.manager.remove(self.guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
                Ok(())
            }
            Err(e) => Err(VoiceError::Connect(e.to_string())),
        }
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        let call = self.manager.get(self.guild_id)?;
        let call = call.lock().await;
        call.current_channel().map(|id| ChannelId::from(id.0))
    }

    async fn play(&self, request: PlayRequest) -> Result<(), VoiceError> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or(VoiceError::NotConnected)?;

        let input: Input = HttpRequest::new(self.http.clone(), request.stream.0).into();
        let handle = {
            let mut call = call.lock().await;
            if call.current_connection().is_none() {
                return Err(VoiceError::NotConnected);
            }
            call.stop();
            call.play_input(input)
        };

        if let Err(e) = handle.set_volume(request.volume) {
            warn!("No se pudo ajustar el volumen inicial: {:?}", e);
        }
        if let Some(offset) = request.start_offset {
            let _ = handle.seek(offset);
        }

        // End y Error comparten el mismo notificador: solo el primero lo consume
        let slot = Arc::new(Mutex::new(Some(request.completion)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(Event::Track(event), TrackEndNotifier { slot: slot.clone() }) {
                // El track ya terminó antes de registrar el handler
                debug!("Track finalizado antes de registrar eventos: {:?}", e);
                if let Some(notifier) = slot.lock().take() {
                    notifier.notify(Some(e.to_string()));
                }
                break;
            }
        }

        *self.track.lock() = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<(), VoiceError> {
        let handle = self.current_track().ok_or(VoiceError::NotConnected)?;
        handle.pause().map_err(|e| VoiceError::Playback(e.to_string()))
    }

    async fn resume(&self) -> Result<(), VoiceError> {
        let handle = self.current_track().ok_or(VoiceError::NotConnected)?;
        handle.play().map_err(|e| VoiceError::Playback(e.to_string()))
    }

    async fn stop(&self) -> Result<(), VoiceError> {
        match self.track.lock().take() {
            Some(handle) => handle.stop().map_err(|e| VoiceError::Playback(e.to_string())),
            None => Ok(()),
        }
    }

    async fn set_volume(&self, volume: f32) -> Result<(), VoiceError> {
        let handle = self.current_track().ok_or(VoiceError::NotConnected)?;
        handle
            .set_volume(volume)
            .map_err(|e| VoiceError::Playback(e.to_string()))
    }

    async fn is_connected(&self) -> bool {
        match self.manager.get(self.guild_id) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn is_playing(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Play))
    }

    async fn is_paused(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Pause))
    }
}

/// Handler para cuando termina (o falla) un track
struct TrackEndNotifier {
    slot: Arc<Mutex<Option<CompletionNotifier>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        if let Some(notifier) = self.slot.lock().take() {
            notifier.notify(error);
        }

        Some(Event::Cancel)
    }
}
