//! In-memory voice connection and resolver for coordinator tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::ChannelId;
use std::{collections::HashSet, time::Duration};

use super::{
    track::Track,
    voice::{CompletionNotifier, PlayRequest, VoiceAdapter, VoiceError},
};
use crate::sources::{ResolveError, Resolved, StreamRef, TrackResolver};

const REFERENCE_PREFIX: &str = "https://youtu.be/";

/// Polls `cond` for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Default)]
struct VoiceState {
    channel: Option<ChannelId>,
    streams: Vec<String>,
    last_offset: Option<Duration>,
    current: Option<CompletionNotifier>,
    paused: bool,
    volume: f32,
}

/// Voice connection that records calls. Streams only end when a test
/// calls [`FakeVoice::finish_current`] or the player stops them.
#[derive(Default)]
pub struct FakeVoice {
    state: Mutex<VoiceState>,
    connect_delay: Option<Duration>,
}

impl FakeVoice {
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Ends the live stream naturally. False if nothing was playing.
    pub fn finish_current(&self) -> bool {
        let current = self.state.lock().current.take();
        match current {
            Some(notifier) => {
                notifier.notify(None);
                true
            }
            None => false,
        }
    }

    pub fn streams(&self) -> Vec<String> {
        self.state.lock().streams.clone()
    }

    pub fn last_offset(&self) -> Option<Duration> {
        self.state.lock().last_offset
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    fn end_current(&self) {
        let current = self.state.lock().current.take();
        if let Some(notifier) = current {
            notifier.notify(None);
        }
    }
}

#[async_trait]
impl VoiceAdapter for FakeVoice {
    async fn connect(&self, channel: ChannelId, _timeout: Duration) -> Result<(), VoiceError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().channel = Some(channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), VoiceError> {
        self.end_current();
        self.state.lock().channel = None;
        Ok(())
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        self.state.lock().channel
    }

    async fn play(&self, request: PlayRequest) -> Result<(), VoiceError> {
        if self.state.lock().channel.is_none() {
            return Err(VoiceError::NotConnected);
        }
        self.end_current();

        let mut state = self.state.lock();
        state.streams.push(request.stream.0);
        state.last_offset = request.start_offset;
        state.volume = request.volume;
        state.paused = false;
        state.current = Some(request.completion);
        Ok(())
    }

    async fn pause(&self) -> Result<(), VoiceError> {
        self.state.lock().paused = true;
        Ok(())
    }

    async fn resume(&self) -> Result<(), VoiceError> {
        self.state.lock().paused = false;
        Ok(())
    }

    async fn stop(&self) -> Result<(), VoiceError> {
        self.end_current();
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<(), VoiceError> {
        self.state.lock().volume = volume;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().channel.is_some()
    }

    async fn is_playing(&self) -> bool {
        let state = self.state.lock();
        state.current.is_some() && !state.paused
    }

    async fn is_paused(&self) -> bool {
        let state = self.state.lock();
        state.current.is_some() && state.paused
    }
}

/// Resolves `"name"` and `"https://youtu.be/name"` to the same track,
/// titled `name` and uploaded by "Artist".
#[derive(Default)]
pub struct ScriptedResolver {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
}

impl ScriptedResolver {
    pub fn fail_on(&self, query: &str) {
        self.failing.lock().insert(query.to_string());
    }

    /// Panics once on `query`, then resolves it normally.
    pub fn panic_on(&self, query: &str) {
        self.panicking.lock().insert(query.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TrackResolver for ScriptedResolver {
    async fn resolve(&self, query: &str) -> Result<Resolved, ResolveError> {
        self.calls.lock().push(query.to_string());
        if self.failing.lock().contains(query) {
            return Err(ResolveError::NotFound(query.to_string()));
        }
        if self.panicking.lock().remove(query) {
            panic!("resolver exploded on {}", query);
        }

        let name = query.strip_prefix(REFERENCE_PREFIX).unwrap_or(query);
        Ok(Resolved {
            track: Track::new(name, format!("{}{}", REFERENCE_PREFIX, name))
                .with_uploader("Artist")
                .with_duration_secs(180),
            stream: StreamRef(format!("stream://{}", name)),
        })
    }
}
