use std::{
    collections::HashMap,
    sync::{LazyLock, RwLock},
};

use chrono::FixedOffset;

use super::value::trim_nul;

static ZONES: LazyLock<RwLock<HashMap<i32, FixedOffset>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Returns the shared zone for `seconds` east of UTC.
pub fn fixed_zone(seconds: i32) -> Option<FixedOffset> {
    if let Some(tz) = ZONES.read().ok().and_then(|z| z.get(&seconds).copied()) {
        return Some(tz);
    }

    let tz = FixedOffset::east_opt(seconds)?;
    if let Ok(mut zones) = ZONES.write() {
        zones.entry(seconds).or_insert(tz);
    }
    Some(tz)
}

/// Parses an `OffsetTime*` value such as `+09:00` or `-0530`.
pub fn parse_offset_time(buf: &[u8]) -> Option<FixedOffset> {
    let s = std::str::from_utf8(trim_nul(buf)).ok()?.trim();
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if h > 14 || m >= 60 {
        return None;
    }
    fixed_zone(sign * (h * 3600 + m * 60))
}

/// Zone for a whole-hour offset, as written by Canon's `TimeZoneOffset`.
pub fn hours_zone(hours: i16) -> Option<FixedOffset> {
    if !(-12..=14).contains(&hours) {
        return None;
    }
    fixed_zone(hours as i32 * 3600)
}
