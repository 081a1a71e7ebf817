use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Format a timestamp the way every column in this database stores it:
/// RFC 3339, UTC, millisecond precision (`2026-10-18T09:30:00.000Z`).
/// Values in this form sort lexicographically.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a stored timestamp. Accepts RFC 3339 and SQLite's
/// `datetime('now')` form (`YYYY-MM-DD HH:MM:SS`, assumed UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub(crate) fn parse_opt_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().and_then(parse_timestamp)
}

/// Decode the JSON array stored in `orders.photos`. Anything that is not an
/// array of strings decodes to an empty list.
pub(crate) fn parse_photo_refs(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

pub(crate) fn normalize_label(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}
