use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{info, warn};
use serde_json::{Map, Value};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::{
    catalog::{CatalogConfig, RoadRecord, SegmentCatalog},
    config::ColumnMapping,
    events::{Event, sort_by_timestamp},
};

/// Read newline-delimited road records.
///
/// Lines that are not a record (invalid UTF-8, malformed JSON, no id) are skipped; the
/// second value is how many were skipped.
pub fn read_road_records(reader: impl BufRead) -> Result<(Vec<RoadRecord>, usize)> {
    let mut records = Vec::new();
    let mut malformed = 0;

    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = line.with_context(|| format!("Failed to read road line {}", line_no + 1))?;
        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                malformed += 1;
                warn!("Skipping road line {} with invalid UTF-8: {}", line_no + 1, e);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RoadRecord>(line.trim_end_matches('\r')) {
            Ok(record) => records.push(record),
            Err(e) => {
                malformed += 1;
                warn!("Skipping malformed road record on line {}: {}", line_no + 1, e);
            }
        }
    }

    if malformed > 0 {
        warn!("{} malformed road records skipped", malformed);
    }
    Ok((records, malformed))
}

/// Build a catalog from newline-delimited road records, counting unreadable lines as
/// undecodable
pub fn read_road_catalog(reader: impl BufRead, config: &CatalogConfig) -> Result<SegmentCatalog> {
    let (records, malformed) = read_road_records(reader)?;
    Ok(SegmentCatalog::from_records(records, config).with_unreadable(malformed))
}

/// Load a road catalog from a `.bin` snapshot or newline-delimited road records
pub fn load_road_catalog(path: &Path, config: &CatalogConfig) -> Result<SegmentCatalog> {
    if path.extension().is_some_and(|ext| ext == "bin") {
        return SegmentCatalog::read_snapshot(path);
    }

    info!("Reading road records from {}", path.display());
    let file = File::open(path)
        .with_context(|| format!("Failed to open roads file {}", path.display()))?;
    read_road_catalog(BufReader::new(file), config)
}

/// Counters of an event feed load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLoadStats {
    pub rows: usize,
    pub kept: usize,
    pub malformed: usize,
    pub missing_coordinates: usize,
    pub filtered: usize,
}

/// Read newline-delimited event rows, map columns and order them by timestamp.
///
/// Rows without coordinates or of another event type are dropped. Rows without an id
/// get `evt_{row}` where `row` is the zero-based line position.
pub fn read_events(
    reader: impl BufRead,
    columns: &ColumnMapping,
    event_type: Option<&str>,
) -> Result<(Vec<Event>, EventLoadStats)> {
    let mut events = Vec::new();
    let mut stats = EventLoadStats::default();

    for (row, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read event line {}", row + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        stats.rows += 1;

        let mut fields = match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(fields)) => fields,
            _ => {
                stats.malformed += 1;
                continue;
            }
        };

        let lon = fields.remove(&columns.lon).and_then(|v| v.as_f64());
        let lat = fields.remove(&columns.lat).and_then(|v| v.as_f64());
        let (Some(lon), Some(lat)) = (lon, lat) else {
            stats.missing_coordinates += 1;
            continue;
        };

        let kind = fields.remove(&columns.event_type).and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        });
        if let Some(wanted) = event_type {
            if kind.as_deref() != Some(wanted) {
                stats.filtered += 1;
                continue;
            }
        }

        let event_id = match fields.remove(&columns.event_id) {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => format!("evt_{}", row),
        };
        let heading = fields.remove(&columns.heading).and_then(|v| v.as_f64());
        let timestamp = take_timestamp(&mut fields, &columns.timestamp);

        events.push(Event {
            event_id,
            lon,
            lat,
            heading,
            timestamp,
            event_type: kind,
            properties: fields,
        });
    }

    sort_by_timestamp(&mut events);
    stats.kept = events.len();
    Ok((events, stats))
}

/// Open and read an event feed file
pub fn load_events(
    path: &Path,
    columns: &ColumnMapping,
    event_type: Option<&str>,
) -> Result<Vec<Event>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open events file {}", path.display()))?;
    let (events, stats) = read_events(BufReader::new(file), columns, event_type)?;

    info!(
        "Loaded {} events from {} rows ({} malformed, {} without coordinates, {} filtered by type)",
        stats.kept, stats.rows, stats.malformed, stats.missing_coordinates, stats.filtered
    );
    Ok(events)
}

// Parsed timestamps are lifted out of the row; anything unparseable stays as a property
fn take_timestamp(fields: &mut Map<String, Value>, column: &str) -> Option<DateTime<Utc>> {
    let raw = fields.remove(column)?;
    let parsed = match &raw {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };
    if parsed.is_none() && !raw.is_null() {
        fields.insert(column.to_string(), raw);
    }
    parsed
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
