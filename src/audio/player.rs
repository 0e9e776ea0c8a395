use anyhow::Result;
use futures::{stream, FutureExt, StreamExt};
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    error::PlayerError,
    queue::{LoopMode, TrackQueue},
    state::{clamp_volume, History, PlaybackState, PlayerMode, PlayerStatus},
    timestamp::parse_timestamp,
    track::Track,
    voice::{CompletionNotifier, PlayRequest, VoiceAdapter},
};
use crate::{
    config::Config,
    sources::{ResolveError, Resolved, TrackResolver},
};

/// Pausa tras un fallo del worker antes de seguir procesando eventos
#[cfg(not(test))]
const WORKER_BACKOFF: Duration = Duration::from_secs(2);
#[cfg(test)]
const WORKER_BACKOFF: Duration = Duration::from_millis(20);
const NOTICE_CAPACITY: usize = 32;

/// Knobs the coordinator needs, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub max_queue_size: usize,
    pub history_size: usize,
    pub default_volume: f32,
    pub autoplay: bool,
    pub playlist_concurrency: usize,
    pub inactivity_timeout: Duration,
    pub connect_timeout: Duration,
    pub connect_ceiling: Duration,
    pub resolve_timeout: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 500,
            history_size: 50,
            default_volume: 0.5,
            autoplay: true,
            playlist_concurrency: 3,
            inactivity_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(15),
            connect_ceiling: Duration::from_secs(20),
            resolve_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for PlayerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            history_size: config.history_size,
            default_volume: config.default_volume,
            autoplay: config.enable_autoplay,
            playlist_concurrency: config.playlist_concurrency,
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout),
            connect_timeout: Duration::from_secs(config.voice_connect_timeout),
            connect_ceiling: Duration::from_secs(config.voice_connect_ceiling),
            resolve_timeout: Duration::from_secs(config.resolve_timeout),
        }
    }
}

/// Messages consumed by the guild worker. The worker is the only consumer.
#[derive(Debug)]
pub enum PlayerEvent {
    /// Re-evaluate state: start playback if idle and the queue has tracks.
    Wake,
    /// A stream finished, naturally or because it was stopped.
    TrackEnded { play_id: u64, error: Option<String> },
    /// Restart the current track at `offset` seconds.
    Seek {
        offset: u64,
        reply: oneshot::Sender<Result<(), PlayerError>>,
    },
    /// Idle for longer than the inactivity timeout.
    Inactive,
}

/// Announcements for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerNotice {
    NowPlaying(Track),
    TrackFailed { title: String, error: String },
    QueueEnded,
    Disconnected,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipVote {
    Skipped,
    Pending { votes: usize, required: usize },
}

struct PlayerShared {
    queue: TrackQueue,
    state: PlaybackState,
    history: History,
    /// Stream whose completion the worker acts on; anything else is stale.
    active_play: Option<u64>,
    next_play_id: u64,
    /// Bumped by stop and disconnect. Work started under an older epoch is dropped.
    epoch: u64,
    forced_skip: bool,
    /// Fresh stream for the track at the head of the queue.
    prefetched: Option<Resolved>,
}

struct PlayerInner {
    guild_id: GuildId,
    settings: PlayerSettings,
    voice: Arc<dyn VoiceAdapter>,
    resolver: Arc<dyn TrackResolver>,
    shared: Mutex<PlayerShared>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    notices: broadcast::Sender<PlayerNotice>,
    cancel: CancellationToken,
}

/// Per-guild playback coordinator.
///
/// Public operations mutate shared state under a short lock and hand
/// anything that touches the stream lifecycle to a single worker task,
/// so track transitions for a guild never run concurrently.
pub struct GuildPlayer {
    inner: Arc<PlayerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GuildPlayer {
    /// Creates the player and spawns its worker. Must run inside a tokio runtime.
    pub fn spawn(
        guild_id: GuildId,
        settings: PlayerSettings,
        voice: Arc<dyn VoiceAdapter>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Arc<Self> {
        let (events, receiver) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let shared = PlayerShared {
            queue: TrackQueue::new(settings.max_queue_size),
            state: PlaybackState::new(settings.default_volume, settings.autoplay),
            history: History::new(settings.history_size),
            active_play: None,
            next_play_id: 0,
            epoch: 0,
            forced_skip: false,
            prefetched: None,
        };

        let inner = Arc::new(PlayerInner {
            guild_id,
            settings,
            voice,
            resolver,
            shared: Mutex::new(shared),
            events,
            notices,
            cancel: CancellationToken::new(),
        });

        let worker = Worker {
            inner: inner.clone(),
            events: receiver,
        };
        let handle = tokio::spawn(worker.run());

        Arc::new(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerNotice> {
        self.inner.notices.subscribe()
    }

    /// Cancelled when the player shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn is_worker_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn wake(&self) -> Result<(), PlayerError> {
        self.inner
            .events
            .send(PlayerEvent::Wake)
            .map_err(|_| PlayerError::WorkerUnavailable)
    }

    /// Joins `channel`, or moves there. No-op if already connected to it.
    pub async fn ensure_connected(&self, channel: ChannelId) -> Result<(), PlayerError> {
        let voice = &self.inner.voice;
        if voice.current_channel().await == Some(channel) {
            return Ok(());
        }

        let settings = &self.inner.settings;
        let connect = voice.connect(channel, settings.connect_timeout);
        match tokio::time::timeout(settings.connect_ceiling, connect).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("❌ Error conectando a voz en guild {}: {}", self.inner.guild_id, e);
                return Err(PlayerError::VoiceConnectFailed(e.to_string()));
            }
            Err(_) => {
                warn!("⏰ Timeout conectando a voz en guild {}", self.inner.guild_id);
                return Err(PlayerError::VoiceConnectFailed(format!(
                    "no response after {:?}",
                    settings.connect_ceiling
                )));
            }
        }

        {
            let mut shared = self.inner.shared.lock();
            shared.state.voice_channel = Some(channel);
            if shared.state.mode == PlayerMode::Disconnected {
                shared.state.mode = PlayerMode::Idle;
            }
        }

        self.wake()
    }

    /// Connects to the requester's channel, or requires an existing connection.
    async fn connect_requester(&self, channel: Option<ChannelId>) -> Result<(), PlayerError> {
        match channel {
            Some(channel) => self.ensure_connected(channel).await,
            None if self.inner.voice.is_connected().await => Ok(()),
            None => Err(PlayerError::NotInVoiceChannel),
        }
    }

    /// Resolves `query`, appends it to the queue and starts playback if idle.
    pub async fn enqueue_or_play(
        &self,
        query: &str,
        requester: UserId,
        channel: Option<ChannelId>,
    ) -> Result<Track, PlayerError> {
        self.connect_requester(channel).await?;

        {
            let shared = self.inner.shared.lock();
            if shared.queue.is_full() {
                return Err(PlayerError::QueueFull {
                    max: shared.queue.max_size(),
                });
            }
        }

        let resolved = self.inner.resolve(query).await?;
        let track = resolved.track.clone().with_requester(requester);

        {
            let mut shared = self.inner.shared.lock();
            shared.queue.enqueue(track.clone())?;
            if shared.queue.len() == 1 && shared.state.mode == PlayerMode::Idle {
                shared.prefetched = Some(resolved);
            }
        }

        info!("➕ {} agregado a la cola en guild {}", track.title(), self.inner.guild_id);
        self.wake()?;
        Ok(track)
    }

    /// Resolves many queries with bounded concurrency, keeping their order.
    /// Failures are counted, never fatal.
    pub async fn enqueue_many(
        &self,
        queries: Vec<String>,
        requester: UserId,
        channel: Option<ChannelId>,
    ) -> Result<BatchReport, PlayerError> {
        self.connect_requester(channel).await?;

        let total = queries.len();
        let inner = &self.inner;
        let mut results = stream::iter(queries)
            .map(|query| async move {
                let result = inner.resolve(&query).await;
                (query, result)
            })
            .buffered(inner.settings.playlist_concurrency.max(1));

        let mut report = BatchReport::default();
        while let Some((query, result)) = results.next().await {
            let resolved = match result {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("⚠️ Omitiendo '{}': {}", query, e);
                    continue;
                }
            };

            let pushed = inner
                .shared
                .lock()
                .queue
                .enqueue(resolved.track.with_requester(requester));
            if let Err(e) = pushed {
                warn!("⚠️ Cola llena, se descartan las canciones restantes: {}", e);
                break;
            }

            report.added += 1;
            if report.added == 1 {
                // Empezar a sonar mientras se resuelve el resto
                self.wake()?;
            }
        }

        report.skipped = total - report.added;
        info!(
            "📋 Lote en guild {}: {} agregadas, {} omitidas",
            self.inner.guild_id, report.added, report.skipped
        );
        Ok(report)
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        if self.inner.shared.lock().state.mode != PlayerMode::Playing {
            return Err(PlayerError::NotPlaying);
        }

        if let Err(e) = self.inner.voice.pause().await {
            warn!("No se pudo pausar en guild {}: {}", self.inner.guild_id, e);
            return Err(PlayerError::NotPlaying);
        }

        let mut shared = self.inner.shared.lock();
        if shared.state.mode == PlayerMode::Playing {
            shared.state.mode = PlayerMode::Paused;
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        if self.inner.shared.lock().state.mode != PlayerMode::Paused {
            return Err(PlayerError::NotPlaying);
        }

        if let Err(e) = self.inner.voice.resume().await {
            warn!("No se pudo reanudar en guild {}: {}", self.inner.guild_id, e);
            return Err(PlayerError::NotPlaying);
        }

        let mut shared = self.inner.shared.lock();
        if shared.state.mode == PlayerMode::Paused {
            shared.state.mode = PlayerMode::Playing;
        }
        Ok(())
    }

    /// Stops the current stream; the worker then advances as if it ended,
    /// except that loop-one does not replay it.
    pub async fn skip(&self) -> Result<(), PlayerError> {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.state.mode.has_stream() {
                return Err(PlayerError::NotPlaying);
            }
            shared.forced_skip = true;
        }

        info!("⏭️ Saltando canción en guild {}", self.inner.guild_id);
        if let Err(e) = self.inner.voice.stop().await {
            warn!("Error deteniendo el stream: {}", e);
        }
        Ok(())
    }

    /// Counts a skip vote and skips once `required` distinct users agree.
    pub async fn vote_skip(&self, user: UserId, required: usize) -> Result<SkipVote, PlayerError> {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.state.mode.has_stream() {
                return Err(PlayerError::NotPlaying);
            }
            shared.state.skip_votes.insert(user);
            let votes = shared.state.skip_votes.len();
            if votes < required {
                return Ok(SkipVote::Pending { votes, required });
            }
        }

        self.skip().await?;
        Ok(SkipVote::Skipped)
    }

    /// Clears queue and current track in one step and halts the stream.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        let had_work = {
            let mut shared = self.inner.shared.lock();
            let cleared = shared.queue.clear();
            let had_work = cleared > 0
                || shared.state.current_track.is_some()
                || shared.state.mode == PlayerMode::Resolving;

            shared.state.set_current(None);
            shared.active_play = None;
            shared.prefetched = None;
            shared.forced_skip = false;
            shared.epoch += 1;
            if shared.state.mode != PlayerMode::Disconnected {
                shared.state.mode = PlayerMode::Idle;
            }
            had_work
        };

        if let Err(e) = self.inner.voice.stop().await {
            debug!("Stop sin stream activo: {}", e);
        }
        self.wake()?;

        if !had_work {
            return Err(PlayerError::NotPlaying);
        }
        info!("⏹️ Reproducción detenida en guild {}", self.inner.guild_id);
        Ok(())
    }

    /// Leaves the voice channel. Queue is kept; the worker keeps running.
    /// Returns whether a connection existed.
    pub async fn disconnect(&self) -> bool {
        let voice = &self.inner.voice;
        let was_connected = voice.is_connected().await;

        {
            let mut shared = self.inner.shared.lock();
            shared.state.set_current(None);
            shared.state.mode = PlayerMode::Disconnected;
            shared.state.voice_channel = None;
            shared.active_play = None;
            shared.prefetched = None;
            shared.forced_skip = false;
            shared.epoch += 1;
        }

        let _ = voice.stop().await;
        if let Err(e) = voice.disconnect().await {
            warn!("Error desconectando de voz en guild {}: {}", self.inner.guild_id, e);
        }

        self.inner.notify(PlayerNotice::Disconnected);
        was_connected
    }

    /// `percent` in 0..=200.
    pub async fn set_volume(&self, percent: u32) -> Result<(), PlayerError> {
        if percent > 200 {
            return Err(PlayerError::InvalidVolume(percent));
        }

        let volume = clamp_volume(percent as f32 / 100.0);
        let live = {
            let mut shared = self.inner.shared.lock();
            shared.state.volume = volume;
            shared.state.mode.has_stream()
        };

        if live {
            if let Err(e) = self.inner.voice.set_volume(volume).await {
                warn!("No se pudo aplicar el volumen: {}", e);
            }
        }

        info!("🔊 Volumen ajustado a {}% en guild {}", percent, self.inner.guild_id);
        Ok(())
    }

    /// Shifts the volume by `delta` points, clamped to 0..=200. Returns the new percentage.
    pub async fn adjust_volume(&self, delta: i32) -> Result<u32, PlayerError> {
        let current = self.current_status().volume_percent() as i32;
        let target = (current + delta).clamp(0, 200) as u32;
        self.set_volume(target).await?;
        Ok(target)
    }

    /// Restarts the current track at `timestamp`. Returns the offset in seconds.
    pub async fn seek(&self, timestamp: &str) -> Result<u64, PlayerError> {
        let offset = parse_timestamp(timestamp)?;

        {
            let shared = self.inner.shared.lock();
            let current = shared
                .state
                .current_track
                .as_ref()
                .filter(|_| shared.state.mode.has_stream())
                .ok_or(PlayerError::NotPlaying)?;
            if current.duration_secs() > 0 && offset >= current.duration_secs() {
                return Err(PlayerError::InvalidTimestamp(timestamp.to_string()));
            }
        }

        let (reply, response) = oneshot::channel();
        self.inner
            .events
            .send(PlayerEvent::Seek { offset, reply })
            .map_err(|_| PlayerError::WorkerUnavailable)?;
        response.await.map_err(|_| PlayerError::WorkerUnavailable)??;

        Ok(offset)
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.inner.shared.lock().state.loop_mode = mode;
        info!("🔁 Modo de repetición: {} en guild {}", mode, self.inner.guild_id);
    }

    /// off → one → all → off
    pub fn cycle_loop_mode(&self) -> LoopMode {
        let mode = self.inner.shared.lock().state.loop_mode.next();
        self.set_loop_mode(mode);
        mode
    }

    pub fn set_autoplay(&self, enabled: bool) {
        self.inner.shared.lock().state.autoplay = enabled;
    }

    pub fn toggle_autoplay(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        shared.state.autoplay = !shared.state.autoplay;
        shared.state.autoplay
    }

    pub fn snapshot_queue(&self) -> Vec<Track> {
        self.inner.shared.lock().queue.snapshot()
    }

    /// Follows the bot when it is moved to another voice channel.
    pub fn track_voice_channel(&self, channel: ChannelId) {
        let mut shared = self.inner.shared.lock();
        if shared.state.mode != PlayerMode::Disconnected && shared.state.voice_channel != Some(channel) {
            debug!("🔀 Bot movido al canal {} en guild {}", channel, self.inner.guild_id);
            shared.state.voice_channel = Some(channel);
        }
    }

    /// Sum of known durations in the queue; live tracks count as zero.
    pub fn queue_duration(&self) -> Duration {
        self.inner.shared.lock().queue.total_duration()
    }

    /// 1-based, as shown in `/queue`.
    pub fn remove_at(&self, index: usize) -> Result<Track, PlayerError> {
        let mut shared = self.inner.shared.lock();
        let removed = shared.queue.remove_at(index)?;
        if index == 1 {
            shared.prefetched = None;
        }
        Ok(removed)
    }

    /// Returns the number of shuffled tracks.
    pub fn shuffle(&self) -> usize {
        let mut shared = self.inner.shared.lock();
        shared.queue.shuffle();
        shared.prefetched = None;
        shared.queue.len()
    }

    pub fn current_status(&self) -> PlayerStatus {
        let shared = self.inner.shared.lock();
        PlayerStatus {
            current_track: shared.state.current_track.clone(),
            mode: shared.state.mode,
            loop_mode: shared.state.loop_mode,
            autoplay: shared.state.autoplay,
            volume: shared.state.volume,
            voice_channel: shared.state.voice_channel,
            queue_len: shared.queue.len(),
            skip_votes: shared.state.skip_votes.len(),
        }
    }

    /// Disconnects and stops the worker. The player is unusable afterwards.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.cancel.cancel();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("⚠️ El worker de guild {} no terminó a tiempo", self.inner.guild_id);
            }
        }
        info!("🗑️ Reproductor de guild {} cerrado", self.inner.guild_id);
    }
}

impl Drop for GuildPlayer {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Query used to keep playing after the queue runs dry: the first related
/// item not already played, or the finished track's title and uploader.
pub fn autoplay_query(finished: &Track, history: &History) -> Option<String> {
    if let Some(related) = finished
        .related()
        .iter()
        .find(|reference| !history.contains_reference(reference))
    {
        return Some(related.clone());
    }

    let title = finished.title().trim();
    if title.is_empty() {
        return None;
    }
    Some(match finished.uploader().map(str::trim) {
        Some(uploader) if !uploader.is_empty() => format!("{} {}", title, uploader),
        _ => title.to_string(),
    })
}

impl PlayerInner {
    fn notify(&self, notice: PlayerNotice) {
        // Sin suscriptores no es un error
        let _ = self.notices.send(notice);
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, ResolveError> {
        match tokio::time::timeout(self.settings.resolve_timeout, self.resolver.resolve(query)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(query.to_string())),
        }
    }

    async fn handle_event(self: &Arc<Self>, event: PlayerEvent) -> Result<()> {
        match event {
            PlayerEvent::Wake => {
                if self.shared.lock().state.mode == PlayerMode::Idle {
                    self.play_next().await?;
                }
            }
            PlayerEvent::TrackEnded { play_id, error } => self.on_track_end(play_id, error).await?,
            PlayerEvent::Seek { offset, reply } => {
                let result = self.seek_current(offset).await;
                let _ = reply.send(result);
            }
            PlayerEvent::Inactive => self.on_inactivity().await,
        }
        Ok(())
    }

    async fn on_track_end(self: &Arc<Self>, play_id: u64, error: Option<String>) -> Result<()> {
        let (finished, loop_mode, autoplay, forced, epoch) = {
            let mut shared = self.shared.lock();
            if shared.active_play != Some(play_id) {
                debug!("Fin de stream obsoleto #{} ignorado", play_id);
                return Ok(());
            }
            shared.active_play = None;
            let forced = std::mem::take(&mut shared.forced_skip);
            let finished = shared.state.current_track.take();
            shared.state.set_current(None);
            shared.state.mode = PlayerMode::Resolving;
            (
                finished,
                shared.state.loop_mode,
                shared.state.autoplay,
                forced,
                shared.epoch,
            )
        };

        if let Some(error) = &error {
            let title = finished.as_ref().map(|t| t.title().to_string()).unwrap_or_default();
            warn!("❌ Error reproduciendo '{}': {}", title, error);
            self.notify(PlayerNotice::TrackFailed {
                title,
                error: error.clone(),
            });
        }

        // Un track que falla no se repite
        if loop_mode == LoopMode::One && !forced && error.is_none() {
            if let Some(track) = finished.clone() {
                debug!("🔂 Repitiendo: {}", track.title());
                if self.start(track, None, epoch).await? {
                    return Ok(());
                }
            }
        }

        let seed = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                return Ok(());
            }
            if let Some(track) = &finished {
                shared.history.push(track.clone());
                if loop_mode == LoopMode::All {
                    if let Err(e) = shared.queue.enqueue(track.requeued()) {
                        warn!("🔁 No se pudo reencolar '{}': {}", track.title(), e);
                    }
                }
            }
            match &finished {
                Some(track) if autoplay && shared.queue.is_empty() => {
                    autoplay_query(track, &shared.history).map(|query| (query, track.requester()))
                }
                _ => None,
            }
        };

        if let Some((query, requester)) = seed {
            self.autoplay_enqueue(&query, requester, epoch).await;
        }

        if !self.play_next().await? {
            self.notify(PlayerNotice::QueueEnded);
        }
        Ok(())
    }

    async fn autoplay_enqueue(&self, query: &str, requester: UserId, epoch: u64) {
        info!("🎲 Autoplay buscando: {}", query);
        let resolved = match self.resolve(query).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("🎲 Autoplay no encontró nada para '{}': {}", query, e);
                return;
            }
        };

        let mut shared = self.shared.lock();
        if shared.epoch != epoch {
            return;
        }
        let track = resolved.track.clone().with_requester(requester);
        match shared.queue.enqueue(track) {
            Ok(()) if shared.queue.len() == 1 => shared.prefetched = Some(resolved),
            Ok(()) => {}
            Err(e) => warn!("🎲 Autoplay descartado: {}", e),
        }
    }

    /// Pops tracks until one starts. Returns false when nothing is playing afterwards.
    async fn play_next(self: &Arc<Self>) -> Result<bool> {
        loop {
            let epoch = {
                let mut shared = self.shared.lock();
                let mode = shared.state.mode;
                if mode.has_stream() || mode == PlayerMode::Disconnected {
                    return Ok(mode.has_stream());
                }
                if shared.queue.is_empty() {
                    shared.state.mode = PlayerMode::Idle;
                    return Ok(false);
                }
                shared.epoch
            };

            if !self.voice.is_connected().await {
                warn!("🔇 Sin conexión de voz en guild {}, cola en espera", self.guild_id);
                let mut shared = self.shared.lock();
                if shared.epoch == epoch && !shared.state.mode.has_stream() {
                    shared.state.mode = PlayerMode::Disconnected;
                    shared.state.voice_channel = None;
                }
                return Ok(false);
            }

            let track = {
                let mut shared = self.shared.lock();
                if shared.epoch != epoch {
                    return Ok(false);
                }
                match shared.queue.dequeue_front() {
                    Some(track) => track,
                    None => {
                        shared.state.mode = PlayerMode::Idle;
                        return Ok(false);
                    }
                }
            };

            if self.start(track, None, epoch).await? {
                return Ok(true);
            }
        }
    }

    /// Resolves a fresh stream for `track` and hands it to the voice connection.
    async fn start(self: &Arc<Self>, track: Track, offset: Option<u64>, epoch: u64) -> Result<bool> {
        let (play_id, prefetched) = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                return Ok(false);
            }
            shared.state.mode = PlayerMode::Resolving;
            shared.next_play_id += 1;
            let prefetched = match shared.prefetched.take() {
                Some(resolved)
                    if offset.is_none()
                        && resolved.track.source_reference() == track.source_reference() =>
                {
                    Some(resolved.stream)
                }
                _ => None,
            };
            (shared.next_play_id, prefetched)
        };

        let stream = match prefetched {
            Some(stream) => stream,
            None => match self.resolve(track.source_reference()).await {
                Ok(resolved) => resolved.stream,
                Err(e) => {
                    self.playback_failed(&track, e.to_string(), epoch);
                    return Ok(false);
                }
            },
        };

        let volume = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                debug!("Resolución de '{}' descartada tras stop", track.title());
                return Ok(false);
            }
            shared.active_play = Some(play_id);
            shared.state.volume
        };

        let request = PlayRequest {
            stream,
            start_offset: offset.map(Duration::from_secs),
            volume,
            completion: CompletionNotifier::new(play_id, self.events.clone()),
        };
        if let Err(e) = self.voice.play(request).await {
            {
                let mut shared = self.shared.lock();
                if shared.active_play == Some(play_id) {
                    shared.active_play = None;
                }
            }
            self.playback_failed(&track, e.to_string(), epoch);
            return Ok(false);
        }

        let superseded = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch || shared.active_play != Some(play_id) {
                true
            } else {
                shared.state.set_current(Some(track.clone()));
                shared.state.mode = PlayerMode::Playing;
                false
            }
        };
        if superseded {
            let _ = self.voice.stop().await;
            return Ok(false);
        }

        info!("🎵 Reproduciendo: {} en guild {}", track.title(), self.guild_id);
        self.notify(PlayerNotice::NowPlaying(track));
        Ok(true)
    }

    fn playback_failed(&self, track: &Track, error: String, epoch: u64) {
        warn!("❌ No se pudo reproducir '{}': {}", track.title(), error);
        {
            let mut shared = self.shared.lock();
            if shared.epoch == epoch && shared.state.mode == PlayerMode::Resolving {
                shared.state.mode = PlayerMode::Idle;
            }
        }
        self.notify(PlayerNotice::TrackFailed {
            title: track.title().to_string(),
            error,
        });
    }

    async fn seek_current(self: &Arc<Self>, offset: u64) -> Result<(), PlayerError> {
        let (track, epoch) = {
            let mut shared = self.shared.lock();
            let track = shared
                .state
                .current_track
                .clone()
                .filter(|_| shared.state.mode.has_stream())
                .ok_or(PlayerError::NotPlaying)?;
            // El fin del stream actual ya no debe avanzar la cola
            shared.active_play = None;
            shared.forced_skip = false;
            (track, shared.epoch)
        };

        let _ = self.voice.stop().await;
        let reference = track.source_reference().to_string();

        match self.start(track.clone(), Some(offset), epoch).await {
            Ok(true) => {
                info!("⏩ Saltando a {}s en guild {}", offset, self.guild_id);
                Ok(())
            }
            _ => {
                {
                    let mut shared = self.shared.lock();
                    if shared.epoch == epoch && shared.active_play.is_none() {
                        shared.state.set_current(None);
                        shared.history.push(track);
                    }
                }
                if let Err(e) = self.play_next().await {
                    error!("Error avanzando la cola tras seek fallido: {:?}", e);
                }
                Err(PlayerError::TrackNotFound { query: reference })
            }
        }
    }

    /// Leaves the player in a state the next event can act on after a
    /// failed or panicked step. A live stream is kept.
    async fn recover(&self) {
        let reset = {
            let mut shared = self.shared.lock();
            let live = shared.active_play.is_some() && shared.state.mode.has_stream();
            let reset = !live && shared.state.mode != PlayerMode::Disconnected;
            if reset {
                shared.state.set_current(None);
                shared.state.mode = PlayerMode::Idle;
                shared.active_play = None;
                shared.forced_skip = false;
                shared.prefetched = None;
            }
            reset
        };

        if reset {
            warn!("🩹 Estado de guild {} restablecido tras un fallo", self.guild_id);
            let _ = self.voice.stop().await;
        }
        let _ = self.events.send(PlayerEvent::Wake);
    }

    async fn on_inactivity(&self) {
        if self.shared.lock().state.mode != PlayerMode::Idle {
            return;
        }

        info!("💤 Inactividad en guild {}, desconectando", self.guild_id);
        if let Err(e) = self.voice.disconnect().await {
            warn!("Error desconectando por inactividad: {}", e);
        }

        {
            let mut shared = self.shared.lock();
            if shared.state.mode == PlayerMode::Idle {
                shared.state.mode = PlayerMode::Disconnected;
                shared.state.voice_channel = None;
            }
        }
        self.notify(PlayerNotice::Disconnected);
    }
}

struct Worker {
    inner: Arc<PlayerInner>,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
}

impl Worker {
    async fn run(mut self) {
        let guild_id = self.inner.guild_id;
        let cancel = self.inner.cancel.clone();
        info!("🎛️ Worker iniciado para guild {}", guild_id);

        loop {
            let idle = self.inner.shared.lock().state.mode == PlayerMode::Idle;
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.next_event(idle) => event,
            };
            let Some(event) = event else { break };

            let step = AssertUnwindSafe(self.inner.handle_event(event)).catch_unwind();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = step => outcome,
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("❌ Error en worker de guild {}: {:?}", guild_id, e);
                    self.inner.recover().await;
                    tokio::time::sleep(WORKER_BACKOFF).await;
                }
                Err(_) => {
                    error!("💥 Panic en worker de guild {}, continuando", guild_id);
                    self.inner.recover().await;
                    tokio::time::sleep(WORKER_BACKOFF).await;
                }
            }
        }

        info!("🛑 Worker de guild {} detenido", guild_id);
    }

    /// While idle, waiting is bounded by the inactivity timeout.
    async fn next_event(&mut self, idle: bool) -> Option<PlayerEvent> {
        if !idle {
            return self.events.recv().await;
        }
        match tokio::time::timeout(self.inner.settings.inactivity_timeout, self.events.recv()).await {
            Ok(event) => event,
            Err(_) => Some(PlayerEvent::Inactive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{eventually, FakeVoice, ScriptedResolver};
    use crate::sources::MockTrackResolver;
    use pretty_assertions::assert_eq;

    fn user() -> UserId {
        UserId::new(7)
    }

    fn channel() -> ChannelId {
        ChannelId::new(42)
    }

    fn harness(settings: PlayerSettings) -> (Arc<GuildPlayer>, Arc<FakeVoice>, Arc<ScriptedResolver>) {
        let voice = Arc::new(FakeVoice::default());
        let resolver = Arc::new(ScriptedResolver::default());
        let player = GuildPlayer::spawn(GuildId::new(1), settings, voice.clone(), resolver.clone());
        (player, voice, resolver)
    }

    fn titles(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.title().to_string()).collect()
    }

    async fn wait_playing(player: &GuildPlayer, title: &str) -> PlayerStatus {
        eventually(|| {
            let status = player.current_status();
            status.mode == PlayerMode::Playing
                && status.current_track.as_ref().map(Track::title) == Some(title)
        })
        .await;
        player.current_status()
    }

    /// A suena, B y C en cola
    async fn playing_with_queue(player: &GuildPlayer, queued: &[&str]) {
        player.enqueue_or_play("A", user(), Some(channel())).await.unwrap();
        wait_playing(player, "A").await;
        for query in queued {
            player.enqueue_or_play(query, user(), None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_enqueue_while_idle_starts_playing() {
        let (player, voice, resolver) = harness(PlayerSettings::default());

        let track = player.enqueue_or_play("river", user(), Some(channel())).await.unwrap();
        assert_eq!(track.title(), "river");

        let status = wait_playing(&player, "river").await;
        assert_eq!(status.queue_len, 0);
        assert_eq!(status.voice_channel, Some(channel()));
        assert_eq!(voice.streams(), vec!["stream://river".to_string()]);
        // El stream resuelto al encolar se reutiliza
        assert_eq!(resolver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_requires_voice_channel() {
        let (player, _voice, resolver) = harness(PlayerSettings::default());

        let err = player.enqueue_or_play("river", user(), None).await.unwrap_err();
        assert_eq!(err, PlayerError::NotInVoiceChannel);
        assert_eq!(resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_query_leaves_queue_untouched() {
        let voice = Arc::new(FakeVoice::default());
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|query| Err(ResolveError::NotFound(query.to_string())));
        let player = GuildPlayer::spawn(
            GuildId::new(1),
            PlayerSettings::default(),
            voice.clone(),
            Arc::new(resolver),
        );

        let err = player
            .enqueue_or_play("zzzz-nothing", user(), Some(channel()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PlayerError::TrackNotFound {
                query: "zzzz-nothing".into()
            }
        );
        assert!(player.snapshot_queue().is_empty());
        assert_eq!(player.current_status().mode, PlayerMode::Idle);
    }

    #[tokio::test]
    async fn test_queue_bound_is_enforced() {
        let settings = PlayerSettings {
            max_queue_size: 2,
            ..Default::default()
        };
        let (player, _voice, _resolver) = harness(settings);
        playing_with_queue(&player, &["B", "C"]).await;

        let err = player.enqueue_or_play("D", user(), None).await.unwrap_err();
        assert_eq!(err, PlayerError::QueueFull { max: 2 });
        assert_eq!(titles(&player.snapshot_queue()), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_skip_advances_exactly_once() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B", "C"]).await;

        player.skip().await.unwrap();
        wait_playing(&player, "B").await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(titles(&player.snapshot_queue()), vec!["C"]);
        assert_eq!(
            voice.streams(),
            vec!["stream://A".to_string(), "stream://B".to_string()]
        );
        assert_eq!(player.current_status().current_track.unwrap().title(), "B");
    }

    #[tokio::test]
    async fn test_skip_without_stream_is_rejected() {
        let (player, _voice, _resolver) = harness(PlayerSettings::default());
        assert_eq!(player.skip().await, Err(PlayerError::NotPlaying));
    }

    #[tokio::test]
    async fn test_stop_clears_everything_at_once() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B", "C"]).await;

        player.stop().await.unwrap();

        let status = player.current_status();
        assert_eq!(status.mode, PlayerMode::Idle);
        assert!(status.current_track.is_none());
        assert_eq!(status.queue_len, 0);

        // El fin tardío del stream detenido no revive nada
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(voice.streams().len(), 1);
        assert!(player.current_status().current_track.is_none());
        assert_eq!(player.stop().await, Err(PlayerError::NotPlaying));
    }

    #[tokio::test]
    async fn test_loop_one_replays_current_track() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B"]).await;
        player.set_loop_mode(LoopMode::One);

        assert!(voice.finish_current());
        eventually(|| voice.streams().len() == 2).await;
        let status = wait_playing(&player, "A").await;

        assert_eq!(status.queue_len, 1);
        assert_eq!(voice.streams()[1], "stream://A");
    }

    #[tokio::test]
    async fn test_skip_under_loop_one_advances() {
        let (player, _voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B"]).await;
        player.set_loop_mode(LoopMode::One);

        player.skip().await.unwrap();
        wait_playing(&player, "B").await;
        assert!(player.snapshot_queue().is_empty());
    }

    #[tokio::test]
    async fn test_loop_all_requeues_finished_track() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B"]).await;
        player.set_loop_mode(LoopMode::All);

        voice.finish_current();
        wait_playing(&player, "B").await;

        assert_eq!(titles(&player.snapshot_queue()), vec!["A"]);
    }

    #[tokio::test]
    async fn test_autoplay_resolves_once_when_queue_runs_dry() {
        let (player, voice, resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &[]).await;
        player.set_autoplay(true);
        let before = resolver.call_count();

        voice.finish_current();
        wait_playing(&player, "A Artist").await;

        assert_eq!(resolver.call_count(), before + 1);
        assert_eq!(resolver.calls().last().map(String::as_str), Some("A Artist"));
    }

    #[tokio::test]
    async fn test_autoplay_off_goes_idle() {
        let (player, voice, resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &[]).await;
        player.set_autoplay(false);
        let before = resolver.call_count();
        let mut notices = player.subscribe();

        voice.finish_current();
        let notice = tokio::time::timeout(Duration::from_secs(1), notices.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(notice, PlayerNotice::QueueEnded);
        let status = player.current_status();
        assert_eq!(status.mode, PlayerMode::Idle);
        assert!(status.current_track.is_none());
        assert_eq!(resolver.call_count(), before);
    }

    #[tokio::test]
    async fn test_failed_resolution_moves_to_next_track() {
        let (player, voice, resolver) = harness(PlayerSettings::default());
        resolver.fail_on("https://youtu.be/broken");
        playing_with_queue(&player, &["broken", "C"]).await;
        let mut notices = player.subscribe();

        voice.finish_current();
        wait_playing(&player, "C").await;

        assert_eq!(
            voice.streams(),
            vec!["stream://A".to_string(), "stream://C".to_string()]
        );
        let notice = notices.recv().await.unwrap();
        assert!(matches!(notice, PlayerNotice::TrackFailed { ref title, .. } if title == "broken"));
    }

    #[tokio::test]
    async fn test_volume_bounds() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &[]).await;

        assert_eq!(player.set_volume(250).await, Err(PlayerError::InvalidVolume(250)));
        assert_eq!(player.current_status().volume_percent(), 50);

        player.set_volume(150).await.unwrap();
        assert_eq!(player.current_status().volume_percent(), 150);
        assert_eq!(voice.volume(), 1.5);

        assert_eq!(player.adjust_volume(100).await, Ok(200));
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        assert_eq!(player.pause().await, Err(PlayerError::NotPlaying));

        playing_with_queue(&player, &[]).await;
        player.pause().await.unwrap();
        assert_eq!(player.current_status().mode, PlayerMode::Paused);
        assert!(voice.is_paused().await);
        assert_eq!(player.pause().await, Err(PlayerError::NotPlaying));

        player.resume().await.unwrap();
        assert_eq!(player.current_status().mode, PlayerMode::Playing);
    }

    #[tokio::test]
    async fn test_seek_restarts_current_track() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        assert_eq!(player.seek("1:00").await, Err(PlayerError::NotPlaying));

        playing_with_queue(&player, &["B"]).await;
        assert_eq!(
            player.seek("abc").await,
            Err(PlayerError::InvalidTimestamp("abc".into()))
        );
        assert_eq!(
            player.seek("5:00").await,
            Err(PlayerError::InvalidTimestamp("5:00".into()))
        );

        assert_eq!(player.seek("1:00").await, Ok(60));
        let status = wait_playing(&player, "A").await;
        assert_eq!(status.queue_len, 1);
        assert_eq!(voice.last_offset(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_failed_seek_drops_current_track() {
        let (player, _voice, resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &[]).await;
        resolver.fail_on("https://youtu.be/A");

        assert_eq!(
            player.seek("0:10").await,
            Err(PlayerError::TrackNotFound {
                query: "https://youtu.be/A".into()
            })
        );

        let status = player.current_status();
        assert_eq!(status.mode, PlayerMode::Idle);
        assert!(status.current_track.is_none());
    }

    #[tokio::test]
    async fn test_shuffle_leaves_current_track_alone() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B", "C", "D"]).await;

        assert_eq!(player.shuffle(), 3);

        let status = player.current_status();
        assert_eq!(status.mode, PlayerMode::Playing);
        assert_eq!(status.current_track.as_ref().map(Track::title), Some("A"));
        let mut queued = titles(&player.snapshot_queue());
        queued.sort();
        assert_eq!(queued, vec!["B", "C", "D"]);
        assert_eq!(voice.streams(), vec!["stream://A".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_recovers_from_resolver_panic() {
        let settings = PlayerSettings {
            autoplay: false,
            ..Default::default()
        };
        let (player, voice, resolver) = harness(settings);
        resolver.panic_on("https://youtu.be/boom");
        playing_with_queue(&player, &["boom"]).await;

        voice.finish_current();
        eventually(|| {
            let status = player.current_status();
            status.mode == PlayerMode::Idle && status.current_track.is_none()
        })
        .await;
        assert!(player.is_worker_running());

        player.enqueue_or_play("C", user(), None).await.unwrap();
        wait_playing(&player, "C").await;
        assert_eq!(
            voice.streams(),
            vec!["stream://A".to_string(), "stream://C".to_string()]
        );
    }

    #[tokio::test]
    async fn test_bot_move_updates_voice_channel() {
        let (player, _voice, _resolver) = harness(PlayerSettings::default());
        player.track_voice_channel(ChannelId::new(7));
        assert_eq!(player.current_status().voice_channel, None);

        player.ensure_connected(channel()).await.unwrap();
        player.track_voice_channel(ChannelId::new(43));
        assert_eq!(
            player.current_status().voice_channel,
            Some(ChannelId::new(43))
        );
    }

    #[tokio::test]
    async fn test_enqueue_many_counts_failures() {
        let (player, _voice, resolver) = harness(PlayerSettings::default());
        resolver.fail_on("missing");

        let queries = vec!["one".to_string(), "missing".to_string(), "three".to_string()];
        let report = player
            .enqueue_many(queries, user(), Some(channel()))
            .await
            .unwrap();

        assert_eq!(report, BatchReport { added: 2, skipped: 1 });
        wait_playing(&player, "one").await;
        assert_eq!(titles(&player.snapshot_queue()), vec!["three"]);
    }

    #[tokio::test]
    async fn test_connect_timeout_is_reported() {
        let voice = Arc::new(FakeVoice::with_connect_delay(Duration::from_millis(500)));
        let settings = PlayerSettings {
            connect_ceiling: Duration::from_millis(20),
            ..Default::default()
        };
        let player = GuildPlayer::spawn(
            GuildId::new(1),
            settings,
            voice.clone(),
            Arc::new(ScriptedResolver::default()),
        );

        let err = player.ensure_connected(channel()).await.unwrap_err();
        assert!(matches!(err, PlayerError::VoiceConnectFailed(_)));
        assert_eq!(player.current_status().mode, PlayerMode::Disconnected);
    }

    #[tokio::test]
    async fn test_inactivity_disconnects() {
        let settings = PlayerSettings {
            inactivity_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (player, voice, _resolver) = harness(settings);
        player.ensure_connected(channel()).await.unwrap();

        eventually(|| player.current_status().mode == PlayerMode::Disconnected).await;
        assert!(!voice.is_connected().await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let (player, voice, _resolver) = harness(PlayerSettings::default());
        playing_with_queue(&player, &["B"]).await;

        player.shutdown().await;

        assert!(!player.is_worker_running());
        assert!(!voice.is_connected().await);
        assert_eq!(player.current_status().mode, PlayerMode::Disconnected);
    }

    #[test]
    fn test_autoplay_query_prefers_unplayed_related() {
        let mut history = History::new(10);
        history.push(Track::new("Seen", "https://youtu.be/seen"));

        let finished = Track::new("River", "https://youtu.be/river")
            .with_uploader("Leon Bridges")
            .with_related(vec![
                "https://youtu.be/seen".to_string(),
                "https://youtu.be/fresh".to_string(),
            ]);
        assert_eq!(
            autoplay_query(&finished, &history).as_deref(),
            Some("https://youtu.be/fresh")
        );

        let plain = Track::new("River", "https://youtu.be/river").with_uploader("Leon Bridges");
        assert_eq!(
            autoplay_query(&plain, &history).as_deref(),
            Some("River Leon Bridges")
        );
    }
}
