//! # Audio Module
//!
//! Per-guild playback coordination for Open Jukebox.
//!
//! ## Architecture
//!
//! ### [`player`] - Guild Player
//! - One worker task per guild, the only place track transitions happen
//! - Completion notifications carry a play id; stale ones are ignored
//! - Loop modes, autoplay, inactivity disconnect
//!
//! ### [`queue`] / [`state`] - Queue and Playback State
//! - Bounded FIFO of tracks with paging, shuffle and removal
//! - Mode, volume, loop mode and bounded history
//!
//! ### [`voice`] - Voice Connection
//! - Capability trait over the voice transport, backed by songbird
//!
//! ### [`registry`] - Guild Registry
//! - Lazily creates players and tears them down on guild leave
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use open_jukebox::audio::player::{GuildPlayer, PlayerSettings};
//! # use std::sync::Arc;
//! # use serenity::all::{ChannelId, GuildId, UserId};
//! # async fn example(
//! #     voice: Arc<dyn open_jukebox::audio::voice::VoiceAdapter>,
//! #     resolver: Arc<dyn open_jukebox::sources::TrackResolver>,
//! # ) -> anyhow::Result<()> {
//! let player = GuildPlayer::spawn(GuildId::new(1), PlayerSettings::default(), voice, resolver);
//!
//! player.enqueue_or_play("river leon bridges", UserId::new(7), Some(ChannelId::new(42))).await?;
//! player.pause().await?;
//! player.resume().await?;
//! player.skip().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod player;
pub mod queue;
pub mod registry;
pub mod state;
pub mod timestamp;
pub mod track;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;
