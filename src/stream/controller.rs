use log::{debug, info};
use std::sync::Arc;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError},
    task::JoinHandle,
    time::{Instant, sleep_until},
};

use super::{
    cancel::CancelToken,
    messages::{Control, StreamMessage},
    session::{SessionState, StreamSession, StreamSettings},
};
use crate::{events::Event, matcher::RoadMatcher};

/// Handle to one consumer's replay task.
///
/// The task owns the session state exclusively; this handle only forwards control
/// commands. Dropping the handle cancels the task.
pub struct StreamController {
    controls: Option<UnboundedSender<Control>>,
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl StreamController {
    /// Start streaming `events` through `matcher` into `outbound`
    pub fn spawn(
        matcher: Arc<RoadMatcher>,
        events: Arc<[Event]>,
        settings: StreamSettings,
        outbound: mpsc::Sender<StreamMessage>,
    ) -> Self {
        let (controls, control_rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let task = tokio::spawn(drive(
            StreamSession::new(settings),
            matcher,
            events,
            outbound,
            control_rx,
            cancel.clone(),
        ));

        Self {
            controls: Some(controls),
            cancel,
            task: Some(task),
        }
    }

    /// Forward a control command; false once the session has ended
    pub fn send(&self, control: Control) -> bool {
        self.controls
            .as_ref()
            .is_some_and(|tx| tx.send(control).is_ok())
    }

    /// Forward a raw control message, ignoring anything that does not parse
    pub fn send_text(&self, text: &str) -> bool {
        match Control::parse(text) {
            Some(control) => self.send(control),
            None => {
                debug!("Ignoring unrecognized control message: {}", text);
                self.controls.as_ref().is_some_and(|tx| !tx.is_closed())
            }
        }
    }

    /// Tell the session no more commands will come; it then ends once completed
    pub fn close_controls(&mut self) {
        self.controls = None;
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the session to end on its own
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    /// Cancel the session and wait until its task is gone
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// What ended the pacing wait between batches
enum Wake {
    Elapsed,
    Control(Control),
    ControlsClosed,
    Stop,
}

// What ended the wait while paused or completed; there is no deadline there
enum Idle {
    Control(Control),
    ControlsClosed,
    Stop,
}

async fn next_control(controls: &mut Option<UnboundedReceiver<Control>>) -> Option<Control> {
    match controls {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn drive(
    mut session: StreamSession,
    matcher: Arc<RoadMatcher>,
    events: Arc<[Event]>,
    outbound: mpsc::Sender<StreamMessage>,
    control_rx: UnboundedReceiver<Control>,
    cancel: CancelToken,
) {
    if !matcher.is_ready() {
        let _ = outbound
            .send(StreamMessage::Error {
                message: "Roads not loaded".to_string(),
            })
            .await;
        return;
    }

    // None once the consumer can no longer send controls
    let mut controls = Some(control_rx);
    session.start();
    info!("Stream session started with {} events", events.len());

    loop {
        if cancel.is_cancelled() {
            break;
        }

        // Commands that arrived while busy take effect before the next batch
        while let Some(rx) = controls.as_mut() {
            match rx.try_recv() {
                Ok(control) => {
                    session.apply(control);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => controls = None,
            }
        }

        if session.state() != SessionState::Streaming {
            if controls.is_none() {
                // Nothing can resume or restart the session anymore
                break;
            }
            let idle = tokio::select! {
                _ = cancel.cancelled() => Idle::Stop,
                _ = outbound.closed() => Idle::Stop,
                control = next_control(&mut controls) => match control {
                    Some(control) => Idle::Control(control),
                    None => Idle::ControlsClosed,
                },
            };
            match idle {
                Idle::Control(control) => {
                    session.apply(control);
                }
                Idle::ControlsClosed => controls = None,
                Idle::Stop => break,
            }
            continue;
        }

        for message in session.next_batch(&matcher, &events) {
            let sent = tokio::select! {
                _ = cancel.cancelled() => false,
                result = outbound.send(message) => result.is_ok(),
            };
            if !sent {
                debug!("Consumer disconnected at event {}", session.cursor());
                return;
            }
        }

        if session.state() != SessionState::Streaming {
            continue;
        }

        // Pacing; pause and restart cut it short, speed changes wait for the next batch
        let deadline = Instant::now() + session.settings().tick_interval();
        loop {
            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Stop,
                _ = outbound.closed() => Wake::Stop,
                _ = sleep_until(deadline) => Wake::Elapsed,
                control = next_control(&mut controls) => match control {
                    Some(control) => Wake::Control(control),
                    None => Wake::ControlsClosed,
                },
            };
            match wake {
                Wake::Elapsed => break,
                Wake::Control(control) => {
                    if session.apply(control) {
                        break;
                    }
                }
                Wake::ControlsClosed => controls = None,
                Wake::Stop => {
                    debug!("Session stopped at event {}", session.cursor());
                    return;
                }
            }
        }
    }

    debug!("Session ended at event {}", session.cursor());
}
