use log::info;
use std::sync::{Arc, RwLock};

use crate::{
    events::Event,
    matcher::{MatcherConfig, RoadMatcher},
    stream::{StreamController, StreamMessage, StreamSettings},
};
use tokio::sync::mpsc;

/// Road network and event feed shared by all sessions.
///
/// Both are immutable once built. Replacing either swaps in a new `Arc`; sessions that
/// already attached keep the snapshot they started with.
pub struct ReplayState {
    matcher: RwLock<Arc<RoadMatcher>>,
    events: RwLock<Arc<[Event]>>,
}

impl ReplayState {
    pub fn new(matcher: RoadMatcher, events: Vec<Event>) -> Self {
        Self {
            matcher: RwLock::new(Arc::new(matcher)),
            events: RwLock::new(events.into()),
        }
    }

    /// State without roads or events
    pub fn empty(config: MatcherConfig) -> Self {
        Self::new(RoadMatcher::empty(config), Vec::new())
    }

    pub fn matcher(&self) -> Arc<RoadMatcher> {
        self.matcher
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events(&self) -> Arc<[Event]> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace_matcher(&self, matcher: RoadMatcher) {
        let matcher = Arc::new(matcher);
        info!(
            "Road network replaced: {} segments",
            matcher.catalog().len()
        );
        *self
            .matcher
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = matcher;
    }

    pub fn replace_events(&self, events: Vec<Event>) {
        info!("Event feed replaced: {} events", events.len());
        *self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = events.into();
    }

    /// Attach a new consumer to the current road network and event feed
    pub fn attach(
        &self,
        settings: StreamSettings,
        outbound: mpsc::Sender<StreamMessage>,
    ) -> StreamController {
        StreamController::spawn(self.matcher(), self.events(), settings, outbound)
    }
}
