use anyhow::{Context, Result};
use geo::{Coord, LineString};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use thiserror::Error;

use crate::geometry::{distinct_vertices, round_coord};

/// Road classes that are never drivable and would only produce irrelevant matches
pub const DEFAULT_EXCLUDED_CLASSES: &[&str] = &[
    "footway",
    "path",
    "cycleway",
    "steps",
    "track",
    "service",
    "bridleway",
];

/// One raw road record as handed over by the road data extraction step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoadRecord {
    #[serde(alias = "segment_id")]
    pub id: String,
    /// GeoJSON geometry object
    pub geometry: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub subclass: Option<String>,
}

/// A drivable road polyline, immutable once loaded
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoadSegment {
    pub id: String,
    pub line: LineString<f64>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub name: Option<String>,
}

/// Why a record's geometry was refused
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("geometry is not valid GeoJSON: {0}")]
    InvalidGeometry(#[from] serde_json::Error),
    #[error("expected a LineString, found {0}")]
    NotALineString(String),
    #[error("line string is a closed ring")]
    ClosedRing,
    #[error("line string has fewer than two distinct vertices")]
    Degenerate,
    #[error("coordinate is not finite")]
    NonFiniteCoordinate,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    LineString { coordinates: Vec<Vec<f64>> },
    Point {},
    MultiPoint {},
    MultiLineString {},
    Polygon {},
    MultiPolygon {},
    GeometryCollection {},
}

impl GeoJsonGeometry {
    fn kind(&self) -> &'static str {
        match self {
            Self::LineString { .. } => "LineString",
            Self::Point {} => "Point",
            Self::MultiPoint {} => "MultiPoint",
            Self::MultiLineString {} => "MultiLineString",
            Self::Polygon {} => "Polygon",
            Self::MultiPolygon {} => "MultiPolygon",
            Self::GeometryCollection {} => "GeometryCollection",
        }
    }
}

/// Decode a GeoJSON geometry into a simple, non-degenerate polyline.
pub fn decode_polyline(geometry: &Value) -> Result<LineString<f64>, DecodeError> {
    let decoded: GeoJsonGeometry = serde_json::from_value(geometry.clone())?;
    let GeoJsonGeometry::LineString { coordinates } = decoded else {
        return Err(DecodeError::NotALineString(decoded.kind().to_string()));
    };

    let mut coords = Vec::with_capacity(coordinates.len());
    for position in coordinates {
        // Positions may carry an altitude, only lon/lat matter here
        let (Some(&x), Some(&y)) = (position.first(), position.get(1)) else {
            return Err(DecodeError::Degenerate);
        };
        if !x.is_finite() || !y.is_finite() {
            return Err(DecodeError::NonFiniteCoordinate);
        }
        coords.push(Coord { x, y });
    }

    if distinct_vertices(&coords) < 2 {
        return Err(DecodeError::Degenerate);
    }
    if coords.len() > 2 && coords.first() == coords.last() {
        return Err(DecodeError::ClosedRing);
    }

    Ok(LineString::from(coords))
}

/// Catalog load configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Road classes skipped at load time
    pub excluded_classes: BTreeSet<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            excluded_classes: DEFAULT_EXCLUDED_CLASSES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// Per-reason counters of a catalog load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub total: usize,
    pub loaded: usize,
    pub undecodable: usize,
    pub non_polyline: usize,
    pub excluded: usize,
    pub duplicates: usize,
}

#[derive(Serialize, Deserialize)]
struct CatalogSnapshot {
    segments: Vec<RoadSegment>,
    stats: LoadStats,
}

/// The set of eligible road segments, keyed by id.
///
/// Segment order is the input order of the records, which keeps index slots and
/// tie-breaking deterministic for a given input.
#[derive(Debug, Default)]
pub struct SegmentCatalog {
    segments: Vec<RoadSegment>,
    by_id: HashMap<String, usize>,
    stats: LoadStats,
}

impl SegmentCatalog {
    /// Build the catalog from raw records, skipping and counting everything unusable
    pub fn from_records(records: Vec<RoadRecord>, config: &CatalogConfig) -> Self {
        let mut stats = LoadStats {
            total: records.len(),
            ..Default::default()
        };

        // Decoding is independent per record; collect keeps the input order
        let decoded: Vec<(RoadRecord, Result<LineString<f64>, DecodeError>)> = records
            .into_par_iter()
            .map(|record| {
                let line = decode_polyline(&record.geometry);
                (record, line)
            })
            .collect();

        let mut segments = Vec::with_capacity(decoded.len());
        let mut by_id = HashMap::with_capacity(decoded.len());

        for (record, line) in decoded {
            let line = match line {
                Ok(line) => line,
                Err(DecodeError::InvalidGeometry(e)) => {
                    debug!("Skipping road {}: {}", record.id, e);
                    stats.undecodable += 1;
                    continue;
                }
                Err(e) => {
                    debug!("Skipping road {}: {}", record.id, e);
                    stats.non_polyline += 1;
                    continue;
                }
            };

            if record
                .class
                .as_ref()
                .is_some_and(|c| config.excluded_classes.contains(c))
            {
                stats.excluded += 1;
                continue;
            }

            if by_id.contains_key(&record.id) {
                stats.duplicates += 1;
                continue;
            }

            by_id.insert(record.id.clone(), segments.len());
            segments.push(RoadSegment {
                id: record.id,
                line,
                category: record.class,
                subcategory: record.subclass,
                name: record.name,
            });
        }

        stats.loaded = segments.len();
        info!(
            "Loaded {} road segments from {} records ({} undecodable, {} non-polyline, {} excluded, {} duplicates)",
            stats.loaded,
            stats.total,
            stats.undecodable,
            stats.non_polyline,
            stats.excluded,
            stats.duplicates
        );

        Self {
            segments,
            by_id,
            stats,
        }
    }

    /// Account for records that were dropped before decoding because they could not be read
    pub fn with_unreadable(mut self, count: usize) -> Self {
        self.stats.total += count;
        self.stats.undecodable += count;
        self
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// All segments in slot order
    pub fn segments(&self) -> &[RoadSegment] {
        &self.segments
    }

    pub fn segment_at(&self, slot: usize) -> Option<&RoadSegment> {
        self.segments.get(slot)
    }

    pub fn get_segment(&self, segment_id: &str) -> Option<&RoadSegment> {
        self.by_id.get(segment_id).map(|&slot| &self.segments[slot])
    }

    /// Segment as a GeoJSON feature with coordinates rounded to 1e-6 degree
    pub fn segment_geojson(&self, segment_id: &str) -> Option<Value> {
        let segment = self.get_segment(segment_id)?;
        let coordinates: Vec<[f64; 2]> = segment
            .line
            .coords()
            .map(|c| [round_coord(c.x), round_coord(c.y)])
            .collect();

        Some(json!({
            "type": "Feature",
            "properties": {
                "segment_id": segment.id,
                "display_key": segment.id,
                "name": segment.name,
                "class": segment.category,
                "subclass": segment.subcategory,
            },
            "geometry": {
                "type": "LineString",
                "coordinates": coordinates,
            }
        }))
    }

    /// Persist the catalog so it can be reloaded without decoding the records again
    pub fn write_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Failed to create snapshot {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let snapshot = CatalogSnapshot {
            segments: self.segments.clone(),
            stats: self.stats.clone(),
        };
        let config = bincode::config::standard();
        bincode::serde::encode_into_std_write(&snapshot, &mut writer, config)
            .with_context(|| format!("Failed to encode snapshot {}", path.display()))?;

        info!(
            "Wrote snapshot of {} segments to {}",
            self.segments.len(),
            path.display()
        );
        Ok(())
    }

    pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open snapshot {}", path.display()))?;
        let mut reader = BufReader::new(file);

        let config = bincode::config::standard();
        let snapshot: CatalogSnapshot =
            bincode::serde::decode_from_std_read(&mut reader, config)
                .with_context(|| format!("Invalid snapshot {}", path.display()))?;

        let mut by_id = HashMap::with_capacity(snapshot.segments.len());
        for (slot, segment) in snapshot.segments.iter().enumerate() {
            if by_id.insert(segment.id.clone(), slot).is_some() {
                warn!("Snapshot contains duplicate segment {}", segment.id);
            }
        }

        info!(
            "Loaded snapshot of {} segments from {}",
            snapshot.segments.len(),
            path.display()
        );
        Ok(Self {
            segments: snapshot.segments,
            by_id,
            stats: snapshot.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, geometry: Value, class: Option<&str>) -> RoadRecord {
        RoadRecord {
            id: id.to_string(),
            geometry,
            name: None,
            class: class.map(str::to_string),
            subclass: None,
        }
    }

    #[test]
    fn decodes_line_strings_with_altitude() {
        let line = decode_polyline(&json!({
            "type": "LineString",
            "coordinates": [[0.0, 0.0, 12.0], [0.0, 0.001, 13.0]]
        }))
        .unwrap();
        assert_eq!(line.0.len(), 2);
        assert_eq!(line.0[1].y, 0.001);
    }

    #[test]
    fn rejects_points_rings_and_degenerate_lines() {
        assert!(matches!(
            decode_polyline(&json!({"type": "Point", "coordinates": [0.0, 0.0]})),
            Err(DecodeError::NotALineString(kind)) if kind == "Point"
        ));
        assert!(matches!(
            decode_polyline(&json!({
                "type": "LineString",
                "coordinates": [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]
            })),
            Err(DecodeError::ClosedRing)
        ));
        assert!(matches!(
            decode_polyline(&json!({
                "type": "LineString",
                "coordinates": [[1.0, 1.0], [1.0, 1.0]]
            })),
            Err(DecodeError::Degenerate)
        ));
        assert!(matches!(
            decode_polyline(&json!({"type": "LineString"})),
            Err(DecodeError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn first_duplicate_wins() {
        let line = json!({"type": "LineString", "coordinates": [[0.0, 0.0], [0.0, 1.0]]});
        let mut second = record("a", line.clone(), Some("primary"));
        second.name = Some("second".into());
        let catalog = SegmentCatalog::from_records(
            vec![record("a", line, Some("primary")), second],
            &CatalogConfig::default(),
        );
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.stats().duplicates, 1);
        assert!(catalog.get_segment("a").unwrap().name.is_none());
    }
}
