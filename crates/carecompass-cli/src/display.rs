//! Formatting helpers for terminal output.

use chrono::{Local, TimeZone};

const MINUTE_MS: i64 = 60_000;

/// `just now`, `5m ago`, `3h ago` or `2d ago`
pub fn format_time_ago(ts: i64, now: i64) -> String {
    let mins = (now - ts).div_euclid(MINUTE_MS);
    if mins < 1 {
        return "just now".to_string();
    }
    if mins < 60 {
        return format!("{}m ago", mins);
    }
    let hrs = mins / 60;
    if hrs < 24 {
        return format!("{}h ago", hrs);
    }
    format!("{}d ago", hrs / 24)
}

/// Whole minutes until `ts`, never negative
pub fn minutes_until(ts: i64, now: i64) -> i64 {
    let diff = ts - now;
    ((diff as f64) / MINUTE_MS as f64).round().max(0.0) as i64
}

/// Local date and time such as `Jan 12, 09:30`
pub fn format_date_time(ts: i64) -> String {
    match Local.timestamp_millis_opt(ts).single() {
        Some(dt) => dt.format("%b %-d, %H:%M").to_string(),
        None => ts.to_string(),
    }
}

pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// A small text bar for chart rows
pub fn bar(value: f64, scale: f64) -> String {
    let width = (value * scale).round().max(0.0) as usize;
    "█".repeat(width)
}
