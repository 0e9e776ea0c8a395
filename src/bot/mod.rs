//! # Bot Module
//!
//! Discord gateway wiring for Open Jukebox.
//!
//! - Command registration and dispatch
//! - Per-guild player lifecycle (created on first use, torn down on guild leave)
//! - Auto-disconnect when the voice channel empties
//! - "Now Playing" announcements fed by player notices

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{
        ChannelId, Context, CreateMessage, EventHandler, Guild, GuildId, Interaction, Ready,
        UnavailableGuild, UserId, VoiceState,
    },
    async_trait,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{
        player::{GuildPlayer, PlayerNotice},
        registry::PlayerRegistry,
        state::PlayerMode,
    },
    config::Config,
    sources::PlaylistExpander,
    ui::{buttons, embeds},
};

/// Main Discord event handler.
pub struct JukeboxBot {
    config: Arc<Config>,
    players: Arc<PlayerRegistry>,
    expander: Option<Arc<dyn PlaylistExpander>>,
    /// Último canal de texto usado por guild, destino de los anuncios
    announce_channels: Arc<DashMap<GuildId, ChannelId>>,
}

impl JukeboxBot {
    pub fn new(
        config: Arc<Config>,
        players: Arc<PlayerRegistry>,
        expander: Option<Arc<dyn PlaylistExpander>>,
    ) -> Self {
        Self {
            config,
            players,
            expander,
            announce_channels: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn expander(&self) -> Option<&Arc<dyn PlaylistExpander>> {
        self.expander.as_ref()
    }

    pub fn existing_player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.get(guild_id)
    }

    /// Returns the guild player, creating it (and its announcer) on first use.
    pub fn player_for(&self, ctx: &Context, guild_id: GuildId) -> Arc<GuildPlayer> {
        let (player, created) = self.players.attach(guild_id);
        if created {
            self.spawn_announcer(ctx, &player);
        }
        player
    }

    pub fn remember_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.announce_channels.insert(guild_id, channel_id);
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Publica los avisos del reproductor en el último canal de texto usado
    fn spawn_announcer(&self, ctx: &Context, player: &Arc<GuildPlayer>) {
        let mut notices = player.subscribe();
        let cancel = player.cancellation();
        let player = Arc::downgrade(player);
        let http = ctx.http.clone();
        let channels = self.announce_channels.clone();

        tokio::spawn(async move {
            loop {
                let notice = tokio::select! {
                    _ = cancel.cancelled() => break,
                    notice = notices.recv() => notice,
                };
                let notice = match notice {
                    Ok(notice) => notice,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("📢 Se omitieron {} avisos", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(player) = player.upgrade() else { break };
                let Some(channel) = channels.get(&player.guild_id()).map(|entry| *entry) else {
                    continue;
                };

                let message = match notice {
                    PlayerNotice::NowPlaying(track) => {
                        let status = player.current_status();
                        CreateMessage::new()
                            .embed(embeds::now_playing_embed(&track, &status))
                            .components(buttons::player_controls(&status))
                    }
                    PlayerNotice::TrackFailed { title, .. } => CreateMessage::new().embed(
                        embeds::error_embed(format!("❌ No se pudo reproducir **{}**, pasando a la siguiente", title)),
                    ),
                    PlayerNotice::QueueEnded => CreateMessage::new().embed(embeds::info_embed(
                        "📭 La cola terminó. Usa `/play` para seguir escuchando",
                    )),
                    PlayerNotice::Disconnected => CreateMessage::new()
                        .embed(embeds::info_embed("👋 Desconectado del canal de voz")),
                };
                drop(player);

                if let Err(e) = channel.send_message(&http, message).await {
                    warn!("No se pudo enviar el aviso al canal {}: {:?}", channel, e);
                }
            }
            debug!("📢 Anunciador detenido");
        });
    }
}

/// Usuarios no-bot en un canal de voz. None si la guild no está en caché.
pub fn humans_in_channel(ctx: &Context, guild_id: GuildId, channel: ChannelId) -> Option<usize> {
    let bot_id = ctx.cache.current_user().id;
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    let count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel) && state.user_id != bot_id)
        .filter(|state| !state.member.as_ref().is_some_and(|member| member.user.bot))
        .count();
    Some(count)
}

/// Canal de voz en el que está un usuario
pub fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component) => {
                if let Err(e) = handlers::handle_component(&ctx, component, self).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else { return };
        let Some(player) = self.players.get(guild_id) else { return };

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id {
            match new.channel_id {
                // Movido a otro canal
                Some(channel) => player.track_voice_channel(channel),
                // El bot fue desconectado desde fuera
                None => {
                    let tracked = player.current_status().mode != PlayerMode::Disconnected;
                    if tracked && old.is_some() {
                        info!("🔌 Bot desconectado externamente en guild {}", guild_id);
                        player.disconnect().await;
                    }
                }
            }
            return;
        }

        let Some(channel) = player.current_status().voice_channel else { return };
        if humans_in_channel(&ctx, guild_id, channel) == Some(0) {
            info!("🚪 Canal vacío en guild {}, desconectando", guild_id);
            let _ = player.stop().await;
            player.disconnect().await;
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // Una caída de Discord no es una salida de la guild
        if incomplete.unavailable {
            return;
        }

        self.announce_channels.remove(&incomplete.id);
        if self.players.detach(incomplete.id).await {
            info!("🗑️ Guild {} abandonada, reproductor eliminado", incomplete.id);
        }
    }
}
