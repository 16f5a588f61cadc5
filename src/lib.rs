//! Snap geolocated vehicle events to the nearest drivable road segment and replay
//! the matched feed to consumers at a controllable pace.

pub mod catalog;
pub mod config;
pub mod events;
pub mod geometry;
pub mod io;
pub mod matcher;
pub mod spatial_index;
pub mod state;
pub mod stream;

pub use catalog::{CatalogConfig, LoadStats, RoadRecord, RoadSegment, SegmentCatalog};
pub use events::Event;
pub use matcher::{Direction, MatchResult, MatcherConfig, RoadMatcher};
pub use spatial_index::SpatialIndex;
pub use state::ReplayState;
pub use stream::{Control, StreamController, StreamMessage, StreamSettings};
