use log::{debug, info};
use std::{collections::HashSet, time::Duration};

use super::messages::{Control, EventMessage, SegmentMessage, StreamMessage};
use crate::{events::Event, matcher::RoadMatcher};

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 500;
pub const MIN_TICK_MS: u64 = 10;
pub const MAX_TICK_MS: u64 = 1000;

/// Pacing of a session, always within the allowed bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    batch_size: usize,
    tick_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::new(50, Duration::from_millis(50))
    }
}

impl StreamSettings {
    pub fn new(batch_size: usize, tick_interval: Duration) -> Self {
        let tick_ms = u64::try_from(tick_interval.as_millis()).unwrap_or(MAX_TICK_MS);
        Self {
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            tick_interval: Duration::from_millis(tick_ms.clamp(MIN_TICK_MS, MAX_TICK_MS)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn update(&mut self, batch_size: Option<u64>, tick_ms: Option<u64>) {
        let batch_size = batch_size
            .map(|b| usize::try_from(b).unwrap_or(MAX_BATCH_SIZE))
            .unwrap_or(self.batch_size);
        let tick = tick_ms
            .map(Duration::from_millis)
            .unwrap_or(self.tick_interval);
        *self = Self::new(batch_size, tick);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Paused,
    Completed,
}

/// Per-consumer replay state: where the cursor is and which segments were announced.
#[derive(Debug)]
pub struct StreamSession {
    cursor: usize,
    announced: HashSet<String>,
    settings: StreamSettings,
    state: SessionState,
}

impl StreamSession {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            cursor: 0,
            announced: HashSet::new(),
            settings,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn settings(&self) -> StreamSettings {
        self.settings
    }

    pub fn announced_count(&self) -> usize {
        self.announced.len()
    }

    pub fn is_announced(&self, segment_id: &str) -> bool {
        self.announced.contains(segment_id)
    }

    pub fn start(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Streaming;
        }
    }

    /// Back to the first event with nothing announced, streaming again
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.announced.clear();
        self.state = SessionState::Streaming;
    }

    /// Apply a control command. Returns true when a pending pacing wait should end early.
    pub fn apply(&mut self, control: Control) -> bool {
        match control {
            Control::Pause => {
                if self.state == SessionState::Streaming {
                    debug!("Session paused at {}", self.cursor);
                    self.state = SessionState::Paused;
                    return true;
                }
                false
            }
            Control::Resume => {
                if self.state == SessionState::Paused {
                    debug!("Session resumed at {}", self.cursor);
                    self.state = SessionState::Streaming;
                }
                false
            }
            Control::SetSpeed {
                batch_size,
                tick_ms,
            } => {
                self.settings.update(batch_size, tick_ms);
                debug!(
                    "Session speed set to {} events every {:?}",
                    self.settings.batch_size, self.settings.tick_interval
                );
                false
            }
            Control::Restart => {
                info!("Session restarted");
                self.restart();
                true
            }
        }
    }

    /// Produce the messages of the next batch and advance the cursor.
    ///
    /// Within a batch a segment message always precedes the first event matched to it,
    /// and the progress message closes the batch. Once the cursor is at the end the
    /// call yields the completion message and the session is done.
    pub fn next_batch(&mut self, matcher: &RoadMatcher, events: &[Event]) -> Vec<StreamMessage> {
        if self.state != SessionState::Streaming {
            return Vec::new();
        }

        if self.cursor >= events.len() {
            self.state = SessionState::Completed;
            info!(
                "Session complete: {} events, {} segments",
                events.len(),
                self.announced.len()
            );
            return vec![StreamMessage::Complete {
                total_events: events.len(),
                total_segments: self.announced.len(),
                message: events
                    .is_empty()
                    .then(|| "No events loaded".to_string()),
            }];
        }

        let end = (self.cursor + self.settings.batch_size).min(events.len());
        let mut messages = Vec::with_capacity((end - self.cursor) * 2 + 1);

        for event in &events[self.cursor..end] {
            let result = matcher.match_point(event.lon, event.lat, event.heading);

            if let Some(segment_id) = result.segment_id.as_deref() {
                if !self.announced.contains(segment_id) {
                    if let Some(feature) = matcher.segment_geojson(segment_id) {
                        messages.push(StreamMessage::Segment(SegmentMessage::from_feature(
                            segment_id, feature,
                        )));
                        self.announced.insert(segment_id.to_string());
                    }
                }
            }

            messages.push(StreamMessage::Event(EventMessage::new(event, result)));
        }

        self.cursor = end;
        messages.push(StreamMessage::Progress {
            streamed: self.cursor,
            total: events.len(),
            segments: self.announced.len(),
        });
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_are_clamped() {
        let settings = StreamSettings::new(0, Duration::from_millis(5));
        assert_eq!(settings.batch_size(), 1);
        assert_eq!(settings.tick_interval(), Duration::from_millis(10));

        let mut settings = StreamSettings::new(10_000, Duration::from_secs(60));
        assert_eq!(settings.batch_size(), 500);
        assert_eq!(settings.tick_interval(), Duration::from_millis(1000));

        settings.update(Some(20), None);
        assert_eq!(settings.batch_size(), 20);
        assert_eq!(settings.tick_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn state_transitions() {
        let mut session = StreamSession::new(StreamSettings::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.apply(Control::Pause));

        session.start();
        assert!(session.apply(Control::Pause));
        assert_eq!(session.state(), SessionState::Paused);
        assert!(!session.apply(Control::Resume));
        assert_eq!(session.state(), SessionState::Streaming);

        assert!(session.apply(Control::Restart));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.cursor(), 0);
    }

    #[test]
    fn paused_session_produces_nothing() {
        let matcher = RoadMatcher::empty(Default::default());
        let events = vec![Event::new("e", 0.0, 0.0)];
        let mut session = StreamSession::new(StreamSettings::default());
        session.start();
        session.apply(Control::Pause);
        assert!(session.next_batch(&matcher, &events).is_empty());
        assert_eq!(session.cursor(), 0);
    }
}
