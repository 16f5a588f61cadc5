use clap::Args;
use std::{path::PathBuf, time::Duration};

use crate::{
    catalog::{CatalogConfig, DEFAULT_EXCLUDED_CLASSES},
    matcher::MatcherConfig,
    stream::StreamSettings,
};

/// Column names of the event feed
#[derive(Debug, Clone, Args)]
pub struct ColumnMapping {
    #[arg(id = "col_lon", long = "col-lon", env = "COL_LON", default_value = "lon")]
    pub lon: String,
    #[arg(id = "col_lat", long = "col-lat", env = "COL_LAT", default_value = "lat")]
    pub lat: String,
    #[arg(
        id = "col_event_type",
        long = "col-event-type",
        env = "COL_EVENT_TYPE",
        default_value = "event_type",
    )]
    pub event_type: String,
    #[arg(
        id = "col_timestamp",
        long = "col-timestamp",
        env = "COL_TIMESTAMP",
        default_value = "captured_at",
    )]
    pub timestamp: String,
    #[arg(
        id = "col_heading",
        long = "col-heading",
        env = "COL_HEADING",
        default_value = "ego_heading",
    )]
    pub heading: String,
    #[arg(
        id = "col_event_id",
        long = "col-event-id",
        env = "COL_EVENT_ID",
        default_value = "event_id",
    )]
    pub event_id: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            lon: "lon".to_string(),
            lat: "lat".to_string(),
            event_type: "event_type".to_string(),
            timestamp: "captured_at".to_string(),
            heading: "ego_heading".to_string(),
            event_id: "event_id".to_string(),
        }
    }
}

/// Road network input
#[derive(Debug, Clone, Args)]
pub struct RoadArgs {
    /// Road records (newline-delimited JSON) or a `.bin` catalog snapshot
    #[arg(long, env = "ROADS_PATH", default_value = "data/overture_roads.ndjson")]
    pub roads: PathBuf,

    /// Road classes to skip while loading
    #[arg(
        long = "exclude-class",
        env = "EXCLUDED_CLASSES",
        value_delimiter = ',',
        default_values_t = DEFAULT_EXCLUDED_CLASSES
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
    )]
    pub excluded_classes: Vec<String>,
}

impl RoadArgs {
    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            excluded_classes: self.excluded_classes.iter().cloned().collect(),
        }
    }
}

/// Event feed input
#[derive(Debug, Clone, Args)]
pub struct EventArgs {
    /// Events (newline-delimited JSON)
    #[arg(long, env = "EVENTS_PATH", default_value = "data/events_all.ndjson")]
    pub events: PathBuf,

    /// Only keep events of this type; empty keeps everything
    #[arg(long, env = "EVENT_TYPE", default_value = "Roadworks")]
    pub event_type: String,

    #[command(flatten)]
    pub columns: ColumnMapping,
}

impl EventArgs {
    pub fn event_type_filter(&self) -> Option<&str> {
        Some(self.event_type.as_str()).filter(|t| !t.is_empty())
    }
}

/// Matching parameters
#[derive(Debug, Clone, Args)]
pub struct MatchingArgs {
    /// Maximum snapping distance in meters
    #[arg(long = "radius", env = "MATCH_RADIUS_M", default_value_t = 50.0)]
    pub radius_m: f64,

    /// Heading/road deviation still counted as aligned, in degrees
    #[arg(long, env = "ALIGNMENT_THRESHOLD_DEG", default_value_t = 60.0)]
    pub alignment_threshold: f64,

    /// Heading/road deviation still counted as forward travel, in degrees
    #[arg(long, env = "DIRECTION_THRESHOLD_DEG", default_value_t = 90.0)]
    pub direction_threshold: f64,
}

impl MatchingArgs {
    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            radius_m: self.radius_m,
            alignment_threshold_deg: self.alignment_threshold,
            direction_threshold_deg: self.direction_threshold,
            ..MatcherConfig::default()
        }
    }
}

/// Replay pacing
#[derive(Debug, Clone, Args)]
pub struct StreamArgs {
    /// Events per batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    #[arg(long = "tick-ms", env = "TICK_INTERVAL_MS", default_value_t = 50)]
    pub tick_interval_ms: u64,
}

impl StreamArgs {
    pub fn settings(&self) -> StreamSettings {
        StreamSettings::new(
            self.batch_size,
            Duration::from_millis(self.tick_interval_ms),
        )
    }
}
