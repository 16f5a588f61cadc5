use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{events::Event, matcher::MatchResult};

/// Everything a session sends to its consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    /// Geometry of a segment, sent once per session before the first event on it
    Segment(SegmentMessage),
    Event(EventMessage),
    Progress {
        streamed: usize,
        total: usize,
        segments: usize,
    },
    Complete {
        total_events: usize,
        total_segments: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMessage {
    pub segment_id: String,
    pub display_key: String,
    pub properties: Value,
    pub geometry: Value,
}

impl SegmentMessage {
    /// Split a GeoJSON feature into the segment message fields
    pub fn from_feature(segment_id: &str, mut feature: Value) -> Self {
        Self {
            segment_id: segment_id.to_string(),
            display_key: segment_id.to_string(),
            properties: feature["properties"].take(),
            geometry: feature["geometry"].take(),
        }
    }
}

// Keys of EventMessage that passthrough properties must not shadow
const RESERVED_KEYS: &[&str] = &[
    "type",
    "event_id",
    "lon",
    "lat",
    "heading",
    "timestamp",
    "event_type",
    "matched",
    "matched_segment_id",
    "display_key",
    "directed_id",
    "distance_m",
    "snapped_lon",
    "snapped_lat",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: String,
    pub lon: f64,
    pub lat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub matched: bool,
    pub matched_segment_id: Option<String>,
    pub display_key: Option<String>,
    pub directed_id: Option<String>,
    pub distance_m: Option<f64>,
    pub snapped_lon: Option<f64>,
    pub snapped_lat: Option<f64>,
    #[serde(default, flatten)]
    pub properties: Map<String, Value>,
}

impl EventMessage {
    pub fn new(event: &Event, result: MatchResult) -> Self {
        let properties = event
            .properties
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            event_id: event.event_id.clone(),
            lon: event.lon,
            lat: event.lat,
            heading: event.heading,
            timestamp: event.timestamp,
            event_type: event.event_type.clone(),
            matched: result.matched,
            matched_segment_id: result.segment_id,
            display_key: result.display_key,
            directed_id: result.directed_id,
            distance_m: result.distance_m,
            snapped_lon: result.snapped_lon,
            snapped_lat: result.snapped_lat,
            properties,
        }
    }
}

/// Commands a consumer may send to its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Control {
    Pause,
    Resume,
    SetSpeed {
        #[serde(default)]
        batch_size: Option<u64>,
        #[serde(default)]
        tick_ms: Option<u64>,
    },
    Restart,
}

impl Control {
    /// Parse a JSON control message. Malformed or unknown actions give `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_control_actions() {
        assert_eq!(Control::parse(r#"{"action": "pause"}"#), Some(Control::Pause));
        assert_eq!(
            Control::parse(r#"{"action": "set_speed", "tick_ms": 200}"#),
            Some(Control::SetSpeed {
                batch_size: None,
                tick_ms: Some(200)
            })
        );
        assert_eq!(Control::parse(r#"{"action": "rewind"}"#), None);
        assert_eq!(Control::parse("pause"), None);
        assert_eq!(Control::parse(r#"{"action": "set_speed", "batch_size": -3}"#), None);
    }

    #[test]
    fn messages_carry_type_tag() {
        let progress = StreamMessage::Progress {
            streamed: 10,
            total: 20,
            segments: 3,
        };
        assert_eq!(
            serde_json::to_value(&progress).unwrap(),
            json!({"type": "progress", "streamed": 10, "total": 20, "segments": 3})
        );

        let complete = StreamMessage::Complete {
            total_events: 0,
            total_segments: 0,
            message: None,
        };
        assert_eq!(
            serde_json::to_value(&complete).unwrap(),
            json!({"type": "complete", "total_events": 0, "total_segments": 0})
        );
    }

    #[test]
    fn event_message_passthrough_cannot_shadow_match_fields() {
        let mut event = Event::new("e1", 1.0, 2.0);
        event.properties.insert("matched".into(), json!("yes"));
        event.properties.insert("severity".into(), json!(3));

        let msg = EventMessage::new(&event, MatchResult::unmatched());
        let value = serde_json::to_value(StreamMessage::Event(msg)).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["matched"], false);
        assert_eq!(value["severity"], 3);
        assert!(value["matched_segment_id"].is_null());
    }
}
