use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

use crate::audio::{
    queue::LoopMode,
    state::{PlayerMode, PlayerStatus},
};

/// Paso de volumen de los botones, en puntos porcentuales
pub const VOLUME_STEP: i32 = 10;

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PLAY_PAUSE: &str = "music_play_pause";
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
    pub const LOOP: &str = "music_loop";
    pub const SHUFFLE: &str = "music_shuffle";
    pub const AUTOPLAY: &str = "music_autoplay";
    pub const VOLUME_DOWN: &str = "music_volume_down";
    pub const VOLUME_UP: &str = "music_volume_up";
}

/// Acción asociada a un botón del reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    PlayPause,
    Skip,
    Stop,
    CycleLoop,
    Shuffle,
    ToggleAutoplay,
    VolumeDown,
    VolumeUp,
}

impl ControlAction {
    pub fn from_custom_id(id: &str) -> Option<Self> {
        let action = match id {
            button_ids::PLAY_PAUSE => ControlAction::PlayPause,
            button_ids::SKIP => ControlAction::Skip,
            button_ids::STOP => ControlAction::Stop,
            button_ids::LOOP => ControlAction::CycleLoop,
            button_ids::SHUFFLE => ControlAction::Shuffle,
            button_ids::AUTOPLAY => ControlAction::ToggleAutoplay,
            button_ids::VOLUME_DOWN => ControlAction::VolumeDown,
            button_ids::VOLUME_UP => ControlAction::VolumeUp,
            _ => return None,
        };
        Some(action)
    }
}

fn toggle_style(active: bool) -> ButtonStyle {
    if active {
        ButtonStyle::Success
    } else {
        ButtonStyle::Secondary
    }
}

/// Crea los controles del mensaje "Reproduciendo Ahora"
pub fn player_controls(status: &PlayerStatus) -> Vec<CreateActionRow> {
    let (play_pause_emoji, play_pause_style) = match status.mode {
        PlayerMode::Paused => ('▶', ButtonStyle::Success),
        _ => ('⏸', ButtonStyle::Primary),
    };
    let loop_emoji = match status.loop_mode {
        LoopMode::One => '🔂',
        _ => '🔁',
    };

    let row1 = CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::PLAY_PAUSE)
            .emoji(play_pause_emoji)
            .style(play_pause_style),
        CreateButton::new(button_ids::SKIP)
            .emoji('⏭')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::STOP)
            .emoji('⏹')
            .style(ButtonStyle::Danger),
        CreateButton::new(button_ids::LOOP)
            .emoji(loop_emoji)
            .style(toggle_style(status.loop_mode != LoopMode::Off)),
    ]);

    let row2 = CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::SHUFFLE)
            .emoji('🔀')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::AUTOPLAY)
            .label("Autoplay")
            .emoji('🎲')
            .style(toggle_style(status.autoplay)),
        CreateButton::new(button_ids::VOLUME_DOWN)
            .emoji('🔉')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::VOLUME_UP)
            .emoji('🔊')
            .style(ButtonStyle::Secondary),
    ]);

    vec![row1, row2]
}
