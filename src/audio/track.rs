use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::time::Duration;

/// A resolved, playable track descriptor.
///
/// Tracks are immutable once resolved. The stream URL is not stored here:
/// stream handles expire, so the worker re-resolves `source_reference`
/// right before playing.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    title: String,
    duration_secs: u64,
    thumbnail: Option<String>,
    source_reference: String,
    uploader: Option<String>,
    related: Vec<String>,
    requester: UserId,
    added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, source_reference: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            duration_secs: 0,
            thumbnail: None,
            source_reference: source_reference.into(),
            uploader: None,
            related: Vec::new(),
            requester: UserId::default(),
            added_at: Utc::now(),
        }
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    /// 0 means unknown or live.
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn source_reference(&self) -> &str {
        &self.source_reference
    }
    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }
    pub fn related(&self) -> &[String] {
        &self.related
    }
    pub fn requester(&self) -> UserId {
        self.requester
    }
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    // Setters
    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_related(mut self, related: Vec<String>) -> Self {
        self.related = related;
        self
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = requester;
        self
    }

    /// Copy used by loop-all: same source, fresh enqueue timestamp.
    pub fn requeued(&self) -> Self {
        Self {
            added_at: Utc::now(),
            ..self.clone()
        }
    }
}
