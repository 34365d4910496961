//! # FTP Listing Normalization
//!
//! FTP servers answer `LIST` with free-form text. This module turns one line
//! of it into a [`ListEntry`] (Unix `ls -l` style and MS-DOS style are
//! understood) and turns the raw modification-time text into a UTC instant.
//!
//! Unix listings omit the year for recent files (`Dec 28 21:07`). Those are
//! read in the current UTC year and pulled back one year when that would put
//! them more than an hour in the future, because the server always reports the
//! most recent occurrence.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

static UNIX_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([\-dlbcps])[rwxsStT\-]{9}\S*\s+\d+\s+(?:\S+\s+){1,2}?(\d+)\s+([A-Za-z]{3}\s+\d{1,2}\s+(?:\d{4}|\d{1,2}:\d{2}))\s+(.+)$",
    )
    .expect("static regex")
});

static DOS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}-\d{2}-\d{2,4}\s+\d{1,2}:\d{2}\s*[AaPp][Mm])\s+(<DIR>|\d+)\s+(.+)$")
        .expect("static regex")
});

static MONTH_DAY_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{3} \d{1,2} \d{4}$").expect("static regex"));

static MONTH_DAY_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{3}) (\d{1,2}) (\d{1,2}):(\d{2})$").expect("static regex")
});

static MACHINE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{14})(?:\.\d+)?$").expect("static regex"));

/// One parsed `LIST` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
    /// Modification time exactly as the server printed it.
    pub modified_raw: String,
    pub is_dir: bool,
}

/// Parses one `LIST` line. Returns `None` for headers (`total 12`) and any
/// line in a format that is not recognized.
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(caps) = UNIX_LINE.captures(line) {
        let kind = &caps[1];
        let mut name = caps[4].to_string();
        if kind == "l" {
            if let Some(idx) = name.find(" -> ") {
                name.truncate(idx);
            }
        }
        return Some(ListEntry {
            name,
            size: caps[2].parse().unwrap_or(0),
            modified_raw: caps[3].to_string(),
            is_dir: kind == "d",
        });
    }

    if let Some(caps) = DOS_LINE.captures(line) {
        let is_dir = &caps[2] == "<DIR>";
        return Some(ListEntry {
            name: caps[3].to_string(),
            size: if is_dir { 0 } else { caps[2].parse().unwrap_or(0) },
            modified_raw: caps[1].to_string(),
            is_dir,
        });
    }

    None
}

/// Converts a server-reported modification time to UTC.
///
/// Accepted forms: RFC 3339 with a zone, `YYYYMMDDhhmmss` (MLSD/MDTM),
/// `MMM dd yyyy`, `MMM dd HH:mm` (year inferred from `now`, see module docs)
/// and MS-DOS `MM-dd-yy hh:mmAM`. Anything else yields `None`.
pub fn normalize_modified(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Some(caps) = MACHINE_TIME.captures(&text) {
        return NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d%H%M%S")
            .ok()
            .map(|n| Utc.from_utc_datetime(&n));
    }

    if MONTH_DAY_YEAR.is_match(&text) {
        return NaiveDate::parse_from_str(&text, "%b %d %Y")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|n| Utc.from_utc_datetime(&n));
    }

    if let Some(caps) = MONTH_DAY_TIME.captures(&text) {
        let at_year = |year: i32| {
            let stamp = format!("{} {} {} {}:{}", &caps[1], &caps[2], year, &caps[3], &caps[4]);
            NaiveDateTime::parse_from_str(&stamp, "%b %d %Y %H:%M")
                .ok()
                .map(|n| Utc.from_utc_datetime(&n))
        };
        return match at_year(now.year()) {
            Some(dt) if dt <= now + Duration::hours(1) => Some(dt),
            _ => at_year(now.year() - 1),
        };
    }

    let dos = text.replace(' ', "").to_uppercase();
    let dos = match dos.len() {
        // MM-dd-yyhh:mmAM
        15 | 16 => NaiveDateTime::parse_from_str(&dos, "%m-%d-%y%I:%M%p").ok(),
        // MM-dd-yyyyhh:mmAM
        17 | 18 => NaiveDateTime::parse_from_str(&dos, "%m-%d-%Y%I:%M%p").ok(),
        _ => None,
    };
    dos.map(|n| Utc.from_utc_datetime(&n))
}
