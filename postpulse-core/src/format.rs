//! Formatting helpers for text output.

use chrono::{DateTime, Utc};

/// Format a timestamp relative to `now` (e.g., "2m ago").
pub fn format_relative_time_at(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format a timestamp relative to the current time.
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_time_at(ts, Utc::now())
}

/// Format an optional timestamp as relative time, or "never" if missing.
pub fn format_relative_time_opt(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => format_relative_time(ts),
        None => "never".to_string(),
    }
}

/// Format a count with thousands separators (e.g., "12,345").
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a percentage with two decimals.
pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Horizontal bar scaled to `max`, at most `width` cells.
pub fn bar(value: u64, max: u64, width: usize) -> String {
    if max == 0 {
        return String::new();
    }
    let filled = ((value as f64 / max as f64) * width as f64).round() as usize;
    "█".repeat(filled.min(width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_relative_time() {
        let now = Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap();
        assert_eq!(format_relative_time_at(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(format_relative_time_at(now - Duration::minutes(3), now), "3m ago");
        assert_eq!(format_relative_time_at(now - Duration::hours(2), now), "2h ago");
        assert_eq!(format_relative_time_at(now - Duration::days(10), now), "Mar 10");
        assert_eq!(format_relative_time_at(now + Duration::seconds(5), now), "just now");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[test]
    fn test_bar() {
        assert_eq!(bar(5, 10, 10), "█████");
        assert_eq!(bar(0, 0, 10), "");
        assert_eq!(bar(10, 10, 4).chars().count(), 4);
    }
}
