use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    player::BatchReport,
    queue::{LoopMode, QueuePage},
    state::{PlayerMode, PlayerStatus},
    timestamp::human_time,
    track::Track,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Jukebox";

/// Discord corta los títulos de embed en 256 caracteres
const MAX_TITLE_CHARS: usize = 200;

/// Recorta texto largo respetando caracteres multibyte
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut)
}

fn format_duration(track: &Track) -> String {
    match track.duration_secs() {
        0 => "🔴 En vivo".to_string(),
        secs => human_time(secs),
    }
}

fn loop_label(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Off => "➡️ Desactivado",
        LoopMode::One => "🔂 Canción",
        LoopMode::All => "🔁 Cola",
    }
}

/// Crea un embed para mostrar la canción actual
pub fn now_playing_embed(track: &Track, status: &PlayerStatus) -> CreateEmbed {
    let state = match status.mode {
        PlayerMode::Paused => "⏸️ En pausa",
        _ => "▶️ Reproduciendo",
    };

    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", truncate(track.title(), MAX_TITLE_CHARS)))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", track.uploader().unwrap_or("Desconocido"), true)
        .field("⏱️ Duración", format_duration(track), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester()), true)
        .field("📡 Estado", state, true)
        .field("🔊 Volumen", format!("{}%", status.volume_percent()), true)
        .field("🔁 Repetición", loop_label(status.loop_mode), true)
        .field(
            "🎲 Autoplay",
            if status.autoplay { "Activado" } else { "Desactivado" },
            true,
        )
        .field("📋 En cola", status.queue_len.to_string(), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }
    if track.source_reference().starts_with("http") {
        embed = embed.url(track.source_reference());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!(
            "**{}** se ha agregado a la cola de reproducción",
            truncate(track.title(), MAX_TITLE_CHARS)
        ))
        .color(colors::SUCCESS_GREEN)
        .field("🎤 Artista", track.uploader().unwrap_or("Desconocido"), true)
        .field("⏱️ Duración", format_duration(track), true)
        .field("📍 Posición", position.to_string(), true);

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Crea un embed con el resultado de cargar una playlist
pub fn batch_added_embed(report: &BatchReport, source: &str) -> CreateEmbed {
    let color = if report.added == 0 {
        colors::ERROR_RED
    } else if report.skipped > 0 {
        colors::WARNING_ORANGE
    } else {
        colors::SUCCESS_GREEN
    };

    let mut description = format!(
        "Se agregaron **{} canciones** a la cola de reproducción",
        report.added
    );
    if report.skipped > 0 {
        description.push_str(&format!("\n⚠️ {} no se pudieron cargar", report.skipped));
    }

    CreateEmbed::default()
        .title("📋 Playlist Cargada")
        .description(description)
        .color(color)
        .field("🔗 Fuente", truncate(source, 100), false)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Líneas numeradas de una página de la cola
pub fn queue_lines(page: &QueuePage) -> String {
    page.items
        .iter()
        .enumerate()
        .map(|(offset, track)| {
            format!(
                "`{}.` **{}** `[{}]` - <@{}>",
                page.first_position + offset,
                truncate(track.title(), 60),
                format_duration(track),
                track.requester()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Crea un embed con una página de la cola
pub fn queue_embed(page: &QueuePage, status: &PlayerStatus, total: Duration) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::MUSIC_PURPLE);

    if let Some(current) = &status.current_track {
        embed = embed.field(
            "🎵 Sonando",
            format!("**{}** `[{}]`", truncate(current.title(), 80), format_duration(current)),
            false,
        );
    }

    let body = if page.items.is_empty() {
        "*La cola está vacía*".to_string()
    } else {
        queue_lines(page)
    };

    embed
        .description(body)
        .field("📊 Canciones", page.total_items.to_string(), true)
        .field("⏱️ Duración total", human_time(total.as_secs()), true)
        .field("🔁 Repetición", loop_label(status.loop_mode), true)
        .footer(CreateEmbedFooter::new(format!(
            "Página {}/{} • {}",
            page.current_page, page.total_pages, STANDARD_FOOTER
        )))
}

pub fn success_embed(message: impl Into<String>) -> CreateEmbed {
    CreateEmbed::default()
        .description(message.into())
        .color(colors::SUCCESS_GREEN)
}

pub fn info_embed(message: impl Into<String>) -> CreateEmbed {
    CreateEmbed::default()
        .description(message.into())
        .color(colors::INFO_BLUE)
}

pub fn error_embed(message: impl Into<String>) -> CreateEmbed {
    CreateEmbed::default()
        .description(message.into())
        .color(colors::ERROR_RED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    #[test]
    fn test_truncate_is_char_aware() {
        assert_eq!(truncate("corto", 10), "corto");
        assert_eq!(truncate("canción larguísima", 8), "canción…");
    }

    #[test]
    fn test_queue_lines_are_numbered_from_page_start() {
        let tracks: Vec<Track> = (1..=12)
            .map(|n| {
                Track::new(format!("Tema {}", n), format!("https://youtu.be/{}", n))
                    .with_duration_secs(90)
                    .with_requester(UserId::new(5))
            })
            .collect();

        let page = QueuePage::from_snapshot(&tracks, 2, 10);
        assert_eq!(
            queue_lines(&page),
            "`11.` **Tema 11** `[1:30]` - <@5>\n`12.` **Tema 12** `[1:30]` - <@5>"
        );
    }

    #[test]
    fn test_live_tracks_have_no_clock() {
        let live = Track::new("Radio", "https://youtu.be/live");
        assert_eq!(format_duration(&live), "🔴 En vivo");
    }
}
