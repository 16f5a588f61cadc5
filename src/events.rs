use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One geolocated observation from the vehicle feed.
///
/// Fields the matcher needs are typed; every other column travels along untouched in
/// `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub lon: f64,
    pub lat: f64,
    /// Degrees clockwise from true north
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, flatten)]
    pub properties: Map<String, Value>,
}

impl Event {
    pub fn new(event_id: impl Into<String>, lon: f64, lat: f64) -> Self {
        Self {
            event_id: event_id.into(),
            lon,
            lat,
            heading: None,
            timestamp: None,
            event_type: None,
            properties: Map::new(),
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Stable sort by timestamp; events without one keep their relative order and go first
pub fn sort_by_timestamp(events: &mut [Event]) {
    events.sort_by_key(|e| e.timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn orders_by_timestamp_with_missing_first() {
        let t = |s| Utc.timestamp_opt(s, 0).unwrap();
        let mut events = vec![
            Event::new("late", 0.0, 0.0).with_timestamp(t(20)),
            Event::new("none-a", 0.0, 0.0),
            Event::new("early", 0.0, 0.0).with_timestamp(t(10)),
            Event::new("none-b", 0.0, 0.0),
        ];
        sort_by_timestamp(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["none-a", "none-b", "early", "late"]);
    }

    #[test]
    fn passthrough_properties_flatten() {
        let mut event = Event::new("e1", 1.5, 2.5).with_heading(90.0);
        event
            .properties
            .insert("severity".into(), Value::String("high".into()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["heading"], 90.0);
        assert!(json.get("timestamp").is_none());
    }
}
