//! Parsing helpers for configuration values.

use std::time::Duration;

/// Parse duration string (e.g., "500ms", "30s", "1h", "1d").
///
/// Supported units:
/// - ms: milliseconds
/// - s: seconds
/// - m: minutes
/// - h: hours
/// - d: days
/// - w: weeks
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let split = input.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = input.split_at(split);
    let amount: u64 = digits.parse().ok()?;

    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount.checked_mul(60)?),
        "h" => Duration::from_secs(amount.checked_mul(3600)?),
        "d" => Duration::from_secs(amount.checked_mul(86400)?),
        "w" => Duration::from_secs(amount.checked_mul(604800)?),
        _ => return None,
    };

    Some(duration)
}

/// Format a duration in the largest unit that represents it exactly,
/// so that `parse_duration(&format_duration(d)) == Some(d)` at millisecond
/// precision.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }

    let secs = millis / 1000;
    if secs % 604800 == 0 {
        format!("{}w", secs / 604800)
    } else if secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
