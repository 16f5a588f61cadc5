#![allow(dead_code)]

use roadsnap::{CatalogConfig, MatcherConfig, RoadMatcher, RoadRecord, SegmentCatalog};
use serde_json::json;
use std::sync::Arc;

pub fn road(id: &str, coords: &[(f64, f64)], class: &str) -> RoadRecord {
    let coordinates: Vec<[f64; 2]> = coords.iter().map(|&(x, y)| [x, y]).collect();
    RoadRecord {
        id: id.to_string(),
        geometry: json!({"type": "LineString", "coordinates": coordinates}),
        name: Some(format!("{id} street")),
        class: Some(class.to_string()),
        subclass: None,
    }
}

pub fn matcher_for(records: Vec<RoadRecord>) -> RoadMatcher {
    let catalog = SegmentCatalog::from_records(records, &CatalogConfig::default());
    RoadMatcher::new(Arc::new(catalog), MatcherConfig::default())
}

/// A single ~111 m north-south segment starting at the origin
pub fn north_south() -> RoadMatcher {
    matcher_for(vec![road("ns", &[(0.0, 0.0), (0.0, 0.001)], "primary")])
}
