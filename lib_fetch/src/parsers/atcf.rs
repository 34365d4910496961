//! # ATCF Best-Track Parser
//!
//! Reads Automated Tropical Cyclone Forecast b-deck text: one comma-separated
//! fix per line (`AL, 01, 2024061918, , BEST, 0, 214N, 929W, 35, 1005, TS, ...`),
//! repeated once per wind-radii threshold. The track is reduced to one fix
//! per synoptic time and written beside the archived file as `.json`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use super::{write_sidecar, ParseError, ParseOutcome, Parser};
use crate::loggers::Logger;
use crate::retrieve::RemoteFileRecord;

/// A parsed best track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtcfTrack {
    pub basin: String,
    pub number: String,
    pub year: i32,
    pub fixes: Vec<AtcfFix>,
}

/// One position/intensity fix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtcfFix {
    pub date: DateTime<Utc>,
    /// Degrees, north positive.
    pub lat: f64,
    /// Degrees, east positive.
    pub lon: f64,
    /// Maximum sustained wind, knots.
    pub vmax: Option<u32>,
    /// Minimum sea level pressure, millibars.
    pub mslp: Option<u32>,
    /// Storm type (`TD`, `TS`, `HU`, `EX`, ...).
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl AtcfTrack {
    /// `ATCF.<year><basin><number>`, e.g. `ATCF.2024AL01`.
    pub fn code(&self) -> String {
        format!("ATCF.{}{}{}", self.year, self.basin, self.number)
    }
}

/// Parses b-deck text into a track.
pub fn parse_track(text: &str) -> Result<AtcfTrack, ParseError> {
    let mut basin = None;
    let mut fixes: Vec<AtcfFix> = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason: &str| ParseError::Malformed {
            line: idx + 1,
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 8 {
            return Err(malformed("expected at least 8 comma-separated fields"));
        }

        let date = NaiveDateTime::parse_from_str(&format!("{}00", fields[2]), "%Y%m%d%H%M")
            .map(|n| Utc.from_utc_datetime(&n))
            .map_err(|_| malformed("date is not YYYYMMDDHH"))?;
        let lat = coordinate(fields[6], 'N', 'S').ok_or_else(|| malformed("bad latitude"))?;
        let lon = coordinate(fields[7], 'E', 'W').ok_or_else(|| malformed("bad longitude"))?;

        if basin.is_none() {
            basin = Some((fields[0].to_ascii_uppercase(), fields[1].to_string()));
        }
        // Extra lines for the 50/64 kt radii repeat the same fix.
        if fixes.last().is_some_and(|f| f.date == date) {
            continue;
        }

        fixes.push(AtcfFix {
            date,
            lat,
            lon,
            vmax: fields.get(8).and_then(|v| v.parse().ok()),
            mslp: fields.get(9).and_then(|v| v.parse().ok()).filter(|p| *p > 0),
            kind: fields.get(10).filter(|t| !t.is_empty()).map(|t| t.to_string()),
        });
    }

    let (basin, number) = basin.ok_or(ParseError::Empty)?;
    let year = fixes.first().map(|f| f.date.year()).ok_or(ParseError::Empty)?;
    Ok(AtcfTrack {
        basin,
        number,
        year,
        fixes,
    })
}

/// `214N` → 21.4, `929W` → -92.9.
fn coordinate(field: &str, positive: char, negative: char) -> Option<f64> {
    let last = field.chars().last()?;
    let tenths: f64 = field[..field.len() - last.len_utf8()].trim().parse().ok()?;
    match last.to_ascii_uppercase() {
        h if h == positive => Some(tenths / 10.0),
        h if h == negative => Some(-tenths / 10.0),
        _ => None,
    }
}

/// # ATCF Parser
pub struct AtcfParser {
    logger: Arc<Logger>,
}

impl AtcfParser {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Parser for AtcfParser {
    async fn parse(
        &self,
        _file: &RemoteFileRecord,
        save_path: &Path,
        contents: &[u8],
    ) -> Result<ParseOutcome, ParseError> {
        self.logger.debug("Starting to parse ATCF contents");
        let track = parse_track(std::str::from_utf8(contents)?)?;
        let json = serde_json::to_value(&track)?;
        self.logger.debug(format!("Parsed {} fixes for {}", track.fixes.len(), track.code()));

        let sidecar = write_sidecar(save_path, &json).await?;
        self.logger.debug(format!("Saved JSON to {}", sidecar.display()));

        Ok(ParseOutcome {
            code: track.code(),
            json,
        })
    }
}
