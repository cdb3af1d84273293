use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::cancel::CancelHandle;
use crate::backend::SentRequest;
use crate::definition::Definition;

/// An independently addressable execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    Solo,
    Left,
    Right,
}

impl SlotId {
    pub const ALL: [SlotId; 3] = [SlotId::Solo, SlotId::Left, SlotId::Right];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Solo => 0,
            Self::Left => 1,
            Self::Right => 2,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Solo => "solo",
            Self::Left => "left",
            Self::Right => "right",
        };
        f.write_str(s)
    }
}

/// The last request/response pair of a slot. Committed as a unit when a
/// result lands, never piecemeal.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub sent: SentRequest,
    /// Upstream request as reported by the proxy, if it told us.
    pub upstream: Option<Value>,
    pub response: Value,
}

/// Mutable execution state. Only the engine touches it.
#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) id: SlotId,
    pub(crate) definition: Option<Arc<Definition>>,
    pub(crate) polling: bool,
    pub(crate) handle: Option<CancelHandle>,
    pub(crate) last: Option<Exchange>,
}

impl Slot {
    pub(crate) fn new(id: SlotId) -> Self {
        Self {
            id,
            definition: None,
            polling: false,
            handle: None,
            last: None,
        }
    }

    /// Cancel and drop the in-flight handle, if any. Returns whether
    /// something was running.
    pub(crate) fn abort(&mut self) -> bool {
        self.polling = false;
        match self.handle.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether `generation` still owns this slot's execution fields.
    pub(crate) fn owned_by(&self, generation: u64) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.generation() == generation)
    }

    pub(crate) fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            id: self.id,
            definition: self.definition.clone(),
            polling: self.polling,
            busy: self.handle.is_some(),
            last: self.last.clone(),
        }
    }
}

/// Read-only copy of a slot's state.
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub definition: Option<Arc<Definition>>,
    pub polling: bool,
    /// A request is in flight.
    pub busy: bool,
    pub last: Option<Exchange>,
}
