use anyhow::Result;
use serenity::{
    builder::{
        CreateActionRow, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{humans_in_channel, user_voice_channel, JukeboxBot};
use crate::{
    audio::{
        error::{ErrorKind, PlayerError},
        player::{GuildPlayer, SkipVote},
        queue::{LoopMode, QueuePage},
        state::PlayerMode,
        timestamp::human_time,
    },
    sources::spotify,
    ui::{
        buttons::{self, ControlAction, VOLUME_STEP},
        embeds,
    },
};

const QUEUE_PAGE_SIZE: usize = 10;

/// Respuesta de un comando
enum Reply {
    Public(CreateEmbed),
    Ephemeral(CreateEmbed),
    WithControls(CreateEmbed, Vec<CreateActionRow>),
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Este comando solo funciona en servidores")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );
    bot.remember_channel(guild_id, command.channel_id);

    // /play puede tardar (resolución, playlists)
    let deferred = command.data.name == "play";
    if deferred {
        command.defer(&ctx.http).await?;
    }

    let outcome = match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "pause" => handle_pause(bot, guild_id).await,
        "resume" => handle_resume(bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "stop" => handle_stop(bot, guild_id).await,
        "queue" => handle_queue(&command, bot, guild_id),
        "np" => handle_nowplaying(bot, guild_id),
        "remove" => handle_remove(&command, bot, guild_id),
        "shuffle" => handle_shuffle(bot, guild_id),
        "loop" => handle_loop(ctx, &command, bot, guild_id),
        "autoplay" => handle_autoplay(ctx, &command, bot, guild_id),
        "volume" => handle_volume(ctx, &command, bot, guild_id).await,
        "seek" => handle_seek(&command, bot, guild_id).await,
        "join" => handle_join(ctx, &command, bot, guild_id).await,
        "leave" => handle_leave(bot, guild_id).await,
        _ => Ok(Reply::Ephemeral(embeds::error_embed("❌ Comando no reconocido"))),
    };

    let reply = outcome.unwrap_or_else(|e| error_reply(&e, guild_id));
    send_reply(ctx, &command, reply, deferred).await
}

fn error_reply(err: &PlayerError, guild_id: GuildId) -> Reply {
    match err.kind() {
        ErrorKind::User => debug!("Comando rechazado en guild {}: {}", guild_id, err),
        ErrorKind::Resolution => info!("🔍 Resolución fallida en guild {}: {}", guild_id, err),
        ErrorKind::Connection | ErrorKind::Internal => {
            warn!("⚠️ Error en guild {}: {}", guild_id, err)
        }
    }
    Reply::Ephemeral(embeds::error_embed(err.user_message()))
}

async fn send_reply(
    ctx: &Context,
    command: &CommandInteraction,
    reply: Reply,
    deferred: bool,
) -> Result<()> {
    if deferred {
        let edit = match reply {
            Reply::Public(embed) | Reply::Ephemeral(embed) => {
                EditInteractionResponse::new().embed(embed)
            }
            Reply::WithControls(embed, rows) => {
                EditInteractionResponse::new().embed(embed).components(rows)
            }
        };
        command.edit_response(&ctx.http, edit).await?;
        return Ok(());
    }

    let message = match reply {
        Reply::Public(embed) => CreateInteractionResponseMessage::new().embed(embed),
        Reply::Ephemeral(embed) => CreateInteractionResponseMessage::new()
            .embed(embed)
            .ephemeral(true),
        Reply::WithControls(embed, rows) => CreateInteractionResponseMessage::new()
            .embed(embed)
            .components(rows),
    };
    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

// Funciones auxiliares

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn option_i64(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

fn option_bool(command: &CommandInteraction, name: &str) -> Option<bool> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_bool())
}

/// Los comandos de control no crean reproductores
fn existing_player(bot: &JukeboxBot, guild_id: GuildId) -> Result<Arc<GuildPlayer>, PlayerError> {
    bot.existing_player(guild_id).ok_or(PlayerError::NotPlaying)
}

/// Salta directo si lo pide quien agregó la canción o hay pocos oyentes; si no, vota
async fn skip_or_vote(
    ctx: &Context,
    player: &GuildPlayer,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<(String, bool), PlayerError> {
    let status = player.current_status();
    let current = status.current_track.as_ref().ok_or(PlayerError::NotPlaying)?;
    let listeners = status
        .voice_channel
        .and_then(|channel| humans_in_channel(ctx, guild_id, channel))
        .unwrap_or(1);

    if current.requester() == user_id || listeners <= 2 {
        player.skip().await?;
        return Ok(("⏭️ Canción saltada".to_string(), true));
    }

    match player.vote_skip(user_id, listeners.div_ceil(2)).await? {
        SkipVote::Skipped => Ok(("⏭️ Votación aprobada, canción saltada".to_string(), true)),
        SkipVote::Pending { votes, required } => Ok((
            format!("🗳️ Voto registrado ({}/{} para saltar)", votes, required),
            false,
        )),
    }
}

// Handlers específicos para cada comando

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let query = option_str(command, "query")
        .map(str::trim)
        .filter(|query| !query.is_empty())
        .ok_or_else(|| PlayerError::TrackNotFound {
            query: String::new(),
        })?;

    let channel = user_voice_channel(ctx, guild_id, command.user.id)
        .ok_or(PlayerError::NotInVoiceChannel)?;
    let player = bot.player_for(ctx, guild_id);

    if let Some(expander) = bot.expander().filter(|expander| expander.is_supported(query)) {
        let queries = expander
            .expand(query, bot.config().max_playlist_size)
            .await
            .map_err(|e| PlayerError::PlaylistExpansion(e.to_string()))?;
        if queries.is_empty() {
            return Err(PlayerError::PlaylistExpansion(
                "el enlace no contiene canciones".to_string(),
            ));
        }

        let report = player
            .enqueue_many(queries, command.user.id, Some(channel))
            .await?;
        return Ok(Reply::Public(embeds::batch_added_embed(&report, query)));
    }

    if spotify::parse_link(query).is_some() {
        return Err(PlayerError::PlaylistExpansion(
            "Spotify no está configurado en este bot".to_string(),
        ));
    }

    let track = player
        .enqueue_or_play(query, command.user.id, Some(channel))
        .await?;

    let position = player
        .snapshot_queue()
        .iter()
        .position(|queued| queued == &track);
    let embed = match position {
        Some(index) => embeds::track_added_embed(&track, index + 1),
        None => embeds::success_embed(format!("🎵 Reproduciendo **{}**", track.title())),
    };
    Ok(Reply::Public(embed))
}

async fn handle_pause(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply, PlayerError> {
    existing_player(bot, guild_id)?.pause().await?;
    Ok(Reply::Public(embeds::success_embed("⏸️ Reproducción pausada")))
}

async fn handle_resume(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply, PlayerError> {
    existing_player(bot, guild_id)?.resume().await?;
    Ok(Reply::Public(embeds::success_embed("▶️ Reproducción reanudada")))
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let player = existing_player(bot, guild_id)?;
    let (message, _) = skip_or_vote(ctx, &player, guild_id, command.user.id).await?;
    Ok(Reply::Public(embeds::success_embed(message)))
}

async fn handle_stop(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply, PlayerError> {
    existing_player(bot, guild_id)?.stop().await?;
    Ok(Reply::Public(embeds::success_embed(
        "⏹️ Reproducción detenida y cola limpiada",
    )))
}

fn handle_queue(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let Some(player) = bot.existing_player(guild_id) else {
        return Ok(Reply::Ephemeral(embeds::info_embed("📭 La cola está vacía")));
    };

    let page = option_i64(command, "page").unwrap_or(1).max(1) as usize;
    let page = QueuePage::from_snapshot(&player.snapshot_queue(), page, QUEUE_PAGE_SIZE);
    let status = player.current_status();

    Ok(Reply::Public(embeds::queue_embed(
        &page,
        &status,
        player.queue_duration(),
    )))
}

fn handle_nowplaying(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply, PlayerError> {
    let status = existing_player(bot, guild_id)?.current_status();
    let track = status
        .current_track
        .as_ref()
        .ok_or(PlayerError::NotPlaying)?;

    Ok(Reply::WithControls(
        embeds::now_playing_embed(track, &status),
        buttons::player_controls(&status),
    ))
}

fn handle_remove(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let player = existing_player(bot, guild_id)?;
    let index = option_i64(command, "index").unwrap_or(0).max(0) as usize;

    let removed = player.remove_at(index)?;
    Ok(Reply::Public(embeds::success_embed(format!(
        "🗑️ Eliminada de la cola: **{}**",
        removed.title()
    ))))
}

fn handle_shuffle(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply, PlayerError> {
    let shuffled = existing_player(bot, guild_id)?.shuffle();
    if shuffled < 2 {
        return Ok(Reply::Ephemeral(embeds::info_embed(
            "🔀 No hay suficientes canciones en cola para mezclar",
        )));
    }
    Ok(Reply::Public(embeds::success_embed(format!(
        "🔀 Mezcladas {} canciones",
        shuffled
    ))))
}

fn handle_loop(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let mode = option_str(command, "mode")
        .and_then(LoopMode::parse)
        .unwrap_or_default();
    bot.player_for(ctx, guild_id).set_loop_mode(mode);

    let message = match mode {
        LoopMode::One => "🔂 Repetir canción activado",
        LoopMode::All => "🔁 Repetir cola activado",
        LoopMode::Off => "➡️ Repetición desactivada",
    };
    Ok(Reply::Public(embeds::success_embed(message)))
}

fn handle_autoplay(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let enabled = option_bool(command, "enabled").unwrap_or(true);
    bot.player_for(ctx, guild_id).set_autoplay(enabled);

    let message = if enabled {
        "🎲 Autoplay activado"
    } else {
        "🎲 Autoplay desactivado"
    };
    Ok(Reply::Public(embeds::success_embed(message)))
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let player = bot.player_for(ctx, guild_id);

    let Some(level) = option_i64(command, "level") else {
        let current = player.current_status().volume_percent();
        return Ok(Reply::Ephemeral(embeds::info_embed(format!(
            "🔊 Volumen actual: {}%",
            current
        ))));
    };

    let percent = u32::try_from(level).map_err(|_| PlayerError::InvalidVolume(0))?;
    player.set_volume(percent).await?;
    Ok(Reply::Public(embeds::success_embed(format!(
        "🔊 Volumen ajustado a {}%",
        percent
    ))))
}

async fn handle_seek(
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let timestamp = option_str(command, "timestamp").unwrap_or_default();
    let offset = existing_player(bot, guild_id)?.seek(timestamp).await?;
    Ok(Reply::Public(embeds::success_embed(format!(
        "⏩ Saltando a {}",
        human_time(offset)
    ))))
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<Reply, PlayerError> {
    let channel = user_voice_channel(ctx, guild_id, command.user.id)
        .ok_or(PlayerError::NotInVoiceChannel)?;

    bot.player_for(ctx, guild_id).ensure_connected(channel).await?;
    Ok(Reply::Public(embeds::success_embed(format!(
        "🔊 Conectado a <#{}>",
        channel
    ))))
}

async fn handle_leave(bot: &JukeboxBot, guild_id: GuildId) -> Result<Reply, PlayerError> {
    let player = existing_player(bot, guild_id)?;
    let _ = player.stop().await;

    if !player.disconnect().await {
        return Ok(Reply::Ephemeral(embeds::info_embed(
            "❌ No estoy conectado a un canal de voz",
        )));
    }
    Ok(Reply::Public(embeds::success_embed(
        "👋 Desconectado del canal de voz",
    )))
}

/// Maneja los botones del reproductor
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let Some(guild_id) = component.guild_id else {
        return Ok(());
    };
    let Some(action) = ControlAction::from_custom_id(&component.data.custom_id) else {
        debug!("Componente desconocido: {}", component.data.custom_id);
        return Ok(());
    };

    info!(
        "🔘 Botón {:?} presionado por {} en guild {}",
        action, component.user.name, guild_id
    );
    bot.remember_channel(guild_id, component.channel_id);

    let outcome = match bot.existing_player(guild_id) {
        Some(player) => run_control(ctx, &player, guild_id, component.user.id, action)
            .await
            .map(|result| (player, result)),
        None => Err(PlayerError::NotPlaying),
    };

    let response = match outcome {
        Ok((_, (message, false))) => ephemeral(embeds::info_embed(message)),
        // Tras saltar o detener, el anunciador publica el siguiente estado
        Ok((_, (message, true))) if matches!(action, ControlAction::Skip | ControlAction::Stop) => {
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .embed(embeds::info_embed(format!(
                        "{} por <@{}>",
                        message, component.user.id
                    )))
                    .components(vec![]),
            )
        }
        Ok((player, (message, true))) => {
            let status = player.current_status();
            match &status.current_track {
                Some(track) => CreateInteractionResponse::UpdateMessage(
                    CreateInteractionResponseMessage::new()
                        .embed(embeds::now_playing_embed(track, &status))
                        .components(buttons::player_controls(&status)),
                ),
                None => ephemeral(embeds::info_embed(message)),
            }
        }
        Err(e) => match error_reply(&e, guild_id) {
            Reply::Public(embed) | Reply::Ephemeral(embed) | Reply::WithControls(embed, _) => {
                ephemeral(embed)
            }
        },
    };

    component.create_response(&ctx.http, response).await?;
    Ok(())
}

fn ephemeral(embed: CreateEmbed) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .embed(embed)
            .ephemeral(true),
    )
}

/// Ejecuta la acción de un botón. Devuelve el mensaje y si el embed debe refrescarse.
async fn run_control(
    ctx: &Context,
    player: &GuildPlayer,
    guild_id: GuildId,
    user_id: UserId,
    action: ControlAction,
) -> Result<(String, bool), PlayerError> {
    match action {
        ControlAction::PlayPause => {
            if player.current_status().mode == PlayerMode::Paused {
                player.resume().await?;
                Ok(("▶️ Reanudado".to_string(), true))
            } else {
                player.pause().await?;
                Ok(("⏸️ Pausado".to_string(), true))
            }
        }
        ControlAction::Skip => skip_or_vote(ctx, player, guild_id, user_id).await,
        ControlAction::Stop => {
            player.stop().await?;
            Ok(("⏹️ Detenido".to_string(), true))
        }
        ControlAction::CycleLoop => {
            let mode = player.cycle_loop_mode();
            Ok((format!("🔁 Repetición: {}", mode), true))
        }
        ControlAction::Shuffle => {
            let count = player.shuffle();
            Ok((format!("🔀 Mezcladas {} canciones", count), true))
        }
        ControlAction::ToggleAutoplay => {
            let enabled = player.toggle_autoplay();
            let state = if enabled { "activado" } else { "desactivado" };
            Ok((format!("🎲 Autoplay {}", state), true))
        }
        ControlAction::VolumeDown => {
            let volume = player.adjust_volume(-VOLUME_STEP).await?;
            Ok((format!("🔉 Volumen: {}%", volume), true))
        }
        ControlAction::VolumeUp => {
            let volume = player.adjust_volume(VOLUME_STEP).await?;
            Ok((format!("🔊 Volumen: {}%", volume), true))
        }
    }
}
