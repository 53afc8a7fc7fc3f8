use chrono::{DateTime, Utc};

/// Render an age in minutes as "just now", "5m ago", "3h ago" or "2d ago".
pub fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Negative ages come from clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// Render the last-sync marker (milliseconds since epoch) relative to `now`.
pub fn last_sync_display(marker_ms: Option<i64>, now: DateTime<Utc>) -> String {
    match marker_ms.and_then(DateTime::<Utc>::from_timestamp_millis) {
        Some(at) => age_display((now - at).num_minutes()),
        None => "never".to_string(),
    }
}

/// Format an RFC 3339 scan timestamp as `YYYY-MM-DD HH:MM:SS`.
pub fn format_scan_time(timestamp: &str) -> String {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => timestamp.to_string(),
    }
}
