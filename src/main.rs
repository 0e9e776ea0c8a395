use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod ui;

use crate::audio::player::PlayerSettings;
use crate::audio::registry::PlayerRegistry;
use crate::audio::voice::SongbirdProvider;
use crate::bot::JukeboxBot;
use crate::config::Config;
use crate::sources::{spotify::SpotifyClient, youtube::YtDlpResolver, PlaylistExpander};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Voz y resolución de canciones
    let manager = Songbird::serenity();
    let voices = Arc::new(SongbirdProvider::new(manager.clone()));
    let resolver = Arc::new(YtDlpResolver::new(Duration::from_secs(
        config.resolve_timeout,
    )));

    let expander: Option<Arc<dyn PlaylistExpander>> = match config.spotify_credentials() {
        Some((client_id, client_secret)) => {
            info!("🎧 Spotify habilitado para playlists y álbumes");
            Some(Arc::new(SpotifyClient::new(client_id, client_secret)))
        }
        None => {
            warn!("⚠️ Spotify no configurado, los enlaces de Spotify serán rechazados");
            None
        }
    };

    let players = Arc::new(PlayerRegistry::new(
        PlayerSettings::from(config.as_ref()),
        voices,
        resolver,
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = JukeboxBot::new(config.clone(), players.clone(), expander);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(manager)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        players.detach_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
