use geo::Point;
use log::{debug, trace, warn};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{cmp::Ordering, fmt, sync::Arc};

use crate::{
    catalog::{RoadSegment, SegmentCatalog},
    geometry::{
        METERS_PER_DEGREE, angle_difference, axis_difference, bearing_near, distance_meters,
        project_point_onto_polyline, round_coord, round_to,
    },
    spatial_index::SpatialIndex,
};

/// Point-to-road matching configuration
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Maximum snapping distance (meters)
    pub radius_m: f64,
    /// Overestimate applied to the degree buffer used for candidate pruning
    pub buffer_margin: f64,
    /// Largest heading/road axis deviation still counted as aligned (degrees)
    pub alignment_threshold_deg: f64,
    /// Largest heading/bearing deviation still counted as forward travel (degrees)
    pub direction_threshold_deg: f64,
    /// Normalized arc-length offset on each side of the snap used for bearings
    pub bearing_offset: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            radius_m: 50.0,
            buffer_margin: 1.5,
            alignment_threshold_deg: 60.0,
            direction_threshold_deg: 90.0,
            bearing_offset: 0.01,
        }
    }
}

/// Inferred travel direction relative to the digitized order of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Fwd,
    Rev,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Fwd => write!(f, "fwd"),
            Direction::Rev => write!(f, "rev"),
        }
    }
}

/// Outcome of matching one point. All optional fields are `None` when unmatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matched: bool,
    pub segment_id: Option<String>,
    pub display_key: Option<String>,
    pub directed_id: Option<String>,
    pub direction: Option<Direction>,
    pub distance_m: Option<f64>,
    pub snapped_lon: Option<f64>,
    pub snapped_lat: Option<f64>,
}

impl MatchResult {
    pub fn unmatched() -> Self {
        Self::default()
    }
}

/// A segment within radius of the query point
#[derive(Debug, Clone)]
struct Candidate {
    slot: usize,
    snapped: Point<f64>,
    fraction: f64,
    distance_m: f64,
    aligned: bool,
}

// Aligned before misaligned, then nearest first
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.aligned
        .cmp(&a.aligned)
        .then_with(|| OrderedFloat(a.distance_m).cmp(&OrderedFloat(b.distance_m)))
}

/// Snaps single points to the nearest eligible road segment.
///
/// Immutable after construction, so one instance can serve any number of concurrent
/// sessions.
pub struct RoadMatcher {
    config: MatcherConfig,
    catalog: Arc<SegmentCatalog>,
    index: Option<SpatialIndex>,
}

impl RoadMatcher {
    pub fn new(catalog: Arc<SegmentCatalog>, config: MatcherConfig) -> Self {
        let index = if catalog.is_empty() {
            warn!("No road segments available, every match will come back unmatched");
            None
        } else {
            Some(SpatialIndex::build(catalog.segments()))
        };

        Self {
            config,
            catalog,
            index,
        }
    }

    /// Matcher without any roads
    pub fn empty(config: MatcherConfig) -> Self {
        Self::new(Arc::new(SegmentCatalog::default()), config)
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<SegmentCatalog> {
        &self.catalog
    }

    /// Whether an index was built, i.e. there is anything to match against
    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }

    pub fn get_segment(&self, segment_id: &str) -> Option<&RoadSegment> {
        self.catalog.get_segment(segment_id)
    }

    pub fn segment_geojson(&self, segment_id: &str) -> Option<Value> {
        self.catalog.segment_geojson(segment_id)
    }

    /// Degree buffer used for the candidate query
    pub fn query_buffer_deg(&self) -> f64 {
        self.config.radius_m / METERS_PER_DEGREE * self.config.buffer_margin
    }

    /// Match a point, optionally with the reported heading (degrees from north)
    pub fn match_point(&self, lon: f64, lat: f64, heading: Option<f64>) -> MatchResult {
        let Some(index) = &self.index else {
            return MatchResult::unmatched();
        };
        let heading = heading.filter(|h| h.is_finite());
        let point = Point::new(lon, lat);

        let slots = index.query_around(lon, lat, self.query_buffer_deg());
        if slots.is_empty() {
            trace!("No candidates near ({}, {})", lon, lat);
            return MatchResult::unmatched();
        }

        let best = slots
            .into_iter()
            .filter_map(|slot| self.score_candidate(slot, point, heading))
            .min_by(rank);

        let Some(best) = best else {
            trace!("All candidates near ({}, {}) exceed {}m", lon, lat, self.config.radius_m);
            return MatchResult::unmatched();
        };
        if best.distance_m > self.config.radius_m {
            return MatchResult::unmatched();
        }
        let Some(segment) = self.catalog.segment_at(best.slot) else {
            return MatchResult::unmatched();
        };

        let direction = self.choose_direction(segment, best.fraction, heading);
        debug!(
            "Matched ({}, {}) to {} at {:.2}m ({})",
            lon, lat, segment.id, best.distance_m, direction
        );

        MatchResult {
            matched: true,
            segment_id: Some(segment.id.clone()),
            display_key: Some(segment.id.clone()),
            directed_id: Some(format!("{}:{}", segment.id, direction)),
            direction: Some(direction),
            distance_m: Some(round_to(best.distance_m, 2)),
            snapped_lon: Some(round_coord(best.snapped.x())),
            snapped_lat: Some(round_coord(best.snapped.y())),
        }
    }

    fn score_candidate(
        &self,
        slot: usize,
        point: Point<f64>,
        heading: Option<f64>,
    ) -> Option<Candidate> {
        let segment = self.catalog.segment_at(slot)?;
        let (snapped, fraction) = project_point_onto_polyline(&segment.line, point)?;
        let distance_m = distance_meters(point, snapped);

        if distance_m > self.config.radius_m {
            return None;
        }

        let aligned = match heading {
            None => true,
            Some(heading) => {
                let bearing = bearing_near(&segment.line, fraction, self.config.bearing_offset);
                axis_difference(heading, bearing) <= self.config.alignment_threshold_deg
            }
        };

        Some(Candidate {
            slot,
            snapped,
            fraction,
            distance_m,
            aligned,
        })
    }

    fn choose_direction(
        &self,
        segment: &RoadSegment,
        fraction: f64,
        heading: Option<f64>,
    ) -> Direction {
        let Some(heading) = heading else {
            return Direction::Fwd;
        };

        let bearing = bearing_near(&segment.line, fraction, self.config.bearing_offset);
        if angle_difference(heading, bearing) <= self.config.direction_threshold_deg {
            Direction::Fwd
        } else {
            Direction::Rev
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(aligned: bool, distance_m: f64) -> Candidate {
        Candidate {
            slot: 0,
            snapped: Point::new(0.0, 0.0),
            fraction: 0.0,
            distance_m,
            aligned,
        }
    }

    #[test]
    fn ranking_prefers_alignment_over_distance() {
        let near_misaligned = candidate(false, 2.0);
        let far_aligned = candidate(true, 30.0);
        assert_eq!(rank(&far_aligned, &near_misaligned), Ordering::Less);
        assert_eq!(
            rank(&candidate(true, 5.0), &candidate(true, 6.0)),
            Ordering::Less
        );
        assert_eq!(
            rank(&candidate(false, 5.0), &candidate(false, 5.0)),
            Ordering::Equal
        );
    }

    #[test]
    fn empty_matcher_never_matches() {
        let matcher = RoadMatcher::empty(MatcherConfig::default());
        assert!(!matcher.is_ready());
        assert_eq!(matcher.match_point(0.0, 0.0, None), MatchResult::unmatched());
    }

    #[test]
    fn direction_token_formats_lowercase() {
        assert_eq!(Direction::Fwd.to_string(), "fwd");
        assert_eq!(serde_json::to_string(&Direction::Rev).unwrap(), "\"rev\"");
    }
}
