use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate};
use nostrcal_core::models::{CalendarEntry, CalendarTime};

/// Accepts unix seconds, RFC 3339, or `YYYY-MM-DD` (all-day).
pub fn parse_calendar_time(input: &str) -> Result<CalendarTime> {
    let input = input.trim();
    if let Ok(ts) = input.parse::<u64>() {
        return Ok(CalendarTime::Timestamp(ts));
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(CalendarTime::Date(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        if let Ok(ts) = u64::try_from(dt.timestamp()) {
            return Ok(CalendarTime::Timestamp(ts));
        }
    }
    bail!("unrecognized time '{}': use unix seconds, RFC 3339 or YYYY-MM-DD", input)
}

fn format_time(time: &CalendarTime) -> String {
    match time {
        CalendarTime::Date(d) => d.format("%Y-%m-%d").to_string(),
        CalendarTime::Timestamp(ts) => i64::try_from(*ts)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| ts.to_string()),
    }
}

/// One line per entry: when, title, then optional location and hashtags.
pub fn render_entry(entry: &CalendarEntry) -> String {
    let mut line = format_time(&entry.start);
    match &entry.end {
        Some(end) => {
            line.push_str(" - ");
            line.push_str(&format_time(end));
        }
        None if entry.is_all_day() => line.push_str(" (all day)"),
        None => {}
    }
    line.push_str("  ");
    line.push_str(&entry.title);

    if let Some(location) = &entry.location {
        line.push_str(" @ ");
        line.push_str(location);
    }
    for tag in &entry.hashtags {
        line.push_str(" #");
        line.push_str(tag);
    }
    line.push_str(&format!("  [{}]", entry.identifier));
    line
}
