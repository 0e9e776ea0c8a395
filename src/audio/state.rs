use serenity::model::id::{ChannelId, UserId};
use std::collections::{HashSet, VecDeque};

use super::{queue::LoopMode, track::Track};

pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 2.0;

/// Playback state machine.
///
/// `Resolving` is transient: the worker is fetching a fresh stream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    Idle,
    Resolving,
    Playing,
    Paused,
    Disconnected,
}

impl PlayerMode {
    /// A stream is live on the voice connection.
    pub fn has_stream(self) -> bool {
        matches!(self, PlayerMode::Playing | PlayerMode::Paused)
    }
}

/// Mutable per-guild playback state. Owned by the coordinator and only
/// touched under its guild lock.
#[derive(Debug)]
pub struct PlaybackState {
    pub current_track: Option<Track>,
    pub mode: PlayerMode,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub volume: f32,
    pub voice_channel: Option<ChannelId>,
    pub skip_votes: HashSet<UserId>,
}

impl PlaybackState {
    pub fn new(volume: f32, autoplay: bool) -> Self {
        Self {
            current_track: None,
            mode: PlayerMode::Disconnected,
            loop_mode: LoopMode::Off,
            autoplay,
            volume: clamp_volume(volume),
            voice_channel: None,
            skip_votes: HashSet::new(),
        }
    }

    /// Called on every track change.
    pub fn set_current(&mut self, track: Option<Track>) {
        self.current_track = track;
        self.skip_votes.clear();
    }
}

pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        return MIN_VOLUME;
    }
    volume.clamp(MIN_VOLUME, MAX_VOLUME)
}

/// Bounded list of previously played tracks, newest last.
#[derive(Debug)]
pub struct History {
    items: VecDeque<Track>,
    max_items: usize,
}

impl History {
    pub fn new(max_items: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_items.min(64)),
            max_items,
        }
    }

    pub fn push(&mut self, track: Track) {
        if self.max_items == 0 {
            return;
        }
        self.items.push_back(track);
        while self.items.len() > self.max_items {
            self.items.pop_front();
        }
    }

    pub fn contains_reference(&self, reference: &str) -> bool {
        self.recent()
            .any(|track| track.source_reference() == reference)
    }

    /// Newest first.
    pub fn recent(&self) -> impl Iterator<Item = &Track> {
        self.items.iter().rev()
    }
}

/// Read-only view of a guild player, as returned by `current_status`.
#[derive(Debug, Clone)]
pub struct PlayerStatus {
    pub current_track: Option<Track>,
    pub mode: PlayerMode,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
    pub volume: f32,
    pub voice_channel: Option<ChannelId>,
    pub queue_len: usize,
    pub skip_votes: usize,
}

impl PlayerStatus {
    pub fn volume_percent(&self) -> u32 {
        (self.volume * 100.0).round() as u32
    }
}
