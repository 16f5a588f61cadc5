//! Paced replay of an event feed through the matcher, one session per consumer.

mod cancel;
mod controller;
mod messages;
mod session;

pub use cancel::CancelToken;
pub use controller::StreamController;
pub use messages::{Control, EventMessage, SegmentMessage, StreamMessage};
pub use session::{
    MAX_BATCH_SIZE, MAX_TICK_MS, MIN_BATCH_SIZE, MIN_TICK_MS, SessionState, StreamSession,
    StreamSettings,
};
