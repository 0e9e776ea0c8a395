use regex::Regex;
use std::sync::OnceLock;

use super::error::PlayerError;

fn clock_regex() -> &'static Regex {
    static CLOCK: OnceLock<Regex> = OnceLock::new();
    CLOCK.get_or_init(|| {
        Regex::new(r"^(?:(\d+):)?(\d{1,2}):(\d{2})$").expect("valid timestamp regex")
    })
}

/// Parses `h:mm:ss`, `mm:ss` or plain seconds into seconds.
pub fn parse_timestamp(input: &str) -> Result<u64, PlayerError> {
    let trimmed = input.trim();
    let invalid = || PlayerError::InvalidTimestamp(input.to_string());

    if let Some(caps) = clock_regex().captures(trimmed) {
        let hours: u64 = caps
            .get(1)
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| invalid())?
            .unwrap_or(0);
        let minutes: u64 = caps[2].parse().map_err(|_| invalid())?;
        let seconds: u64 = caps[3].parse().map_err(|_| invalid())?;
        if seconds >= 60 || (hours > 0 && minutes >= 60) {
            return Err(invalid());
        }
        return hours
            .checked_mul(3600)
            .and_then(|secs| secs.checked_add(minutes * 60 + seconds))
            .ok_or_else(invalid);
    }

    // Solo dígitos: los negativos y decimales se rechazan
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed.parse().map_err(|_| invalid());
    }

    Err(invalid())
}

/// 83 → "1:23", 3723 → "1:02:03"
pub fn human_time(seconds: u64) -> String {
    let (minutes, secs) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock_formats() {
        assert_eq!(parse_timestamp("1:23"), Ok(83));
        assert_eq!(parse_timestamp("01:02:03"), Ok(3723));
        assert_eq!(parse_timestamp(" 83 "), Ok(83));
        assert_eq!(parse_timestamp("0"), Ok(0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in [
            "-5",
            "abc",
            "1:2",
            "1:75",
            "",
            "1.5",
            "1:60:00",
            "999999999999999999:00:00",
            "99999999999999999999",
        ] {
            assert_eq!(
                parse_timestamp(bad),
                Err(PlayerError::InvalidTimestamp(bad.to_string())),
                "input {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_human_time() {
        assert_eq!(human_time(0), "0:00");
        assert_eq!(human_time(83), "1:23");
        assert_eq!(human_time(3723), "1:02:03");
    }
}
