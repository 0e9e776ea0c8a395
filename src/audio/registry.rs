use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::info;

use super::{
    player::{GuildPlayer, PlayerSettings},
    voice::VoiceProvider,
};
use crate::sources::TrackResolver;

/// One [`GuildPlayer`] per guild, created on first use and torn down when
/// the bot leaves the guild.
pub struct PlayerRegistry {
    players: DashMap<GuildId, Arc<GuildPlayer>>,
    voices: Arc<dyn VoiceProvider>,
    resolver: Arc<dyn TrackResolver>,
    settings: PlayerSettings,
}

impl PlayerRegistry {
    pub fn new(
        settings: PlayerSettings,
        voices: Arc<dyn VoiceProvider>,
        resolver: Arc<dyn TrackResolver>,
    ) -> Self {
        Self {
            players: DashMap::new(),
            voices,
            resolver,
            settings,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Returns the guild's player, spawning it if needed. The flag tells
    /// whether it was just created.
    pub fn attach(&self, guild_id: GuildId) -> (Arc<GuildPlayer>, bool) {
        match self.players.entry(guild_id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let player = GuildPlayer::spawn(
                    guild_id,
                    self.settings.clone(),
                    self.voices.voice_for(guild_id),
                    self.resolver.clone(),
                );
                entry.insert(player.clone());
                info!("🎛️ Reproductor creado para guild {}", guild_id);
                (player, true)
            }
        }
    }

    /// Shuts the guild's player down. False if there was none.
    pub async fn detach(&self, guild_id: GuildId) -> bool {
        let Some((_, player)) = self.players.remove(&guild_id) else {
            return false;
        };
        player.shutdown().await;
        true
    }

    pub async fn detach_all(&self) {
        let guilds: Vec<GuildId> = self.players.iter().map(|entry| *entry.key()).collect();
        info!("🧹 Cerrando {} reproductores", guilds.len());
        for guild_id in guilds {
            self.detach(guild_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        testing::{FakeVoice, ScriptedResolver},
        voice::VoiceAdapter,
    };

    struct FakeVoices;

    impl VoiceProvider for FakeVoices {
        fn voice_for(&self, _guild_id: GuildId) -> Arc<dyn VoiceAdapter> {
            Arc::new(FakeVoice::default())
        }
    }

    fn registry() -> PlayerRegistry {
        PlayerRegistry::new(
            PlayerSettings::default(),
            Arc::new(FakeVoices),
            Arc::new(ScriptedResolver::default()),
        )
    }

    #[tokio::test]
    async fn test_attach_reuses_existing_player() {
        let registry = registry();
        let guild = GuildId::new(10);

        let (first, created) = registry.attach(guild);
        assert!(created);
        let (second, created) = registry.attach(guild);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_detach_shuts_player_down() {
        let registry = registry();
        let guild = GuildId::new(10);
        let (player, _) = registry.attach(guild);

        assert!(registry.detach(guild).await);
        assert!(!player.is_worker_running());
        assert!(registry.get(guild).is_none());
        assert!(!registry.detach(guild).await);
    }

    #[tokio::test]
    async fn test_detach_all_empties_registry() {
        let registry = registry();
        registry.attach(GuildId::new(1));
        registry.attach(GuildId::new(2));

        registry.detach_all().await;
        assert!(registry.is_empty());
    }
}
