//! Engine lifecycle notifications.
//!
//! The engine emits events via [`EventBus::emit`] and presentation layers
//! subscribe via [`EventBus::subscribe`]. Built on [`tokio::sync::broadcast`]
//! so a renderer and a log view can listen independently.

use tokio::sync::broadcast;

use crate::definition::{InteractionPattern, RunResult};
use crate::engine::{RunError, SlotId};
use crate::metrics::Metrics;

/// Events that flow out of the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// A definition was bound to a slot.
    DefinitionBound { slot: SlotId, definition: String },
    /// The slot's binding was cleared.
    SlotReset { slot: SlotId },
    /// A request left for the backend.
    Submitted {
        slot: SlotId,
        definition: String,
        pattern: InteractionPattern,
    },
    /// HTTP status of the submission envelope.
    ResponseStatus { slot: SlotId, status: u16 },
    /// A job was accepted and will be polled.
    JobQueued {
        slot: SlotId,
        request_id: String,
        interval_ms: u64,
    },
    /// One status query answered.
    PollStatus {
        slot: SlotId,
        status: String,
        poll_count: u32,
    },
    /// One status query failed in transport.
    PollError {
        slot: SlotId,
        message: String,
        consecutive: u32,
    },
    /// A streamed fragment, in arrival order.
    Token { slot: SlotId, text: String },
    /// The server flagged an error on the stream.
    StreamError { slot: SlotId, message: String },
    Completed {
        slot: SlotId,
        result: RunResult,
        metrics: Metrics,
    },
    /// Partial output was kept, but the server flagged an error.
    Interrupted {
        slot: SlotId,
        result: RunResult,
        error: RunError,
        metrics: Metrics,
    },
    Failed {
        slot: SlotId,
        error: RunError,
        metrics: Metrics,
    },
    /// The operation was abandoned. Not a failure.
    Cancelled { slot: SlotId },
    /// Both sides of a compare run have settled.
    CompareSettled,
}

impl Event {
    /// The slot this event concerns, if any.
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::DefinitionBound { slot, .. }
            | Self::SlotReset { slot }
            | Self::Submitted { slot, .. }
            | Self::ResponseStatus { slot, .. }
            | Self::JobQueued { slot, .. }
            | Self::PollStatus { slot, .. }
            | Self::PollError { slot, .. }
            | Self::Token { slot, .. }
            | Self::StreamError { slot, .. }
            | Self::Completed { slot, .. }
            | Self::Interrupted { slot, .. }
            | Self::Failed { slot, .. }
            | Self::Cancelled { slot } => Some(*slot),
            Self::CompareSettled => None,
        }
    }

    /// Whether this is the last event a dispatch emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. }
                | Self::Interrupted { .. }
                | Self::Failed { .. }
                | Self::Cancelled { .. }
        )
    }
}

/// A broadcast channel the engine emits to and presentation subscribes from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Returns a receiver that yields all
    /// future events (does not replay past ones).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::consts::DEFAULT_EVENT_CAPACITY)
    }
}
