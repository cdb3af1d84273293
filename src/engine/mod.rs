//! The multi-slot execution engine.
//!
//! [`Engine`] owns three [`slot`]s (`solo`, `left`, `right`) and drives one
//! request per slot from submission to a terminal [`Outcome`]. Strategies
//! live in their own files: [`sync`] for single round trips, [`stream`] for
//! event-framed bodies, [`poll`] for job status loops and [`compare`] for
//! the two-slot join.
//!
//! Every slot has at most one live operation. Starting a new one, rebinding
//! the slot or resetting it cancels the previous operation first.

pub mod cancel;
pub mod compare;
pub mod outcome;
pub mod poll;
pub mod slot;
pub mod stream;
pub mod sync;

pub use cancel::{CancelHandle, CancelToken};
pub use outcome::{CompareOutcome, Completion, Outcome, RunError};
pub use slot::{Exchange, SlotId, SlotSnapshot};

use anyhow::Result;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{Backend, SentRequest};
use crate::consts::{DEFAULT_EVENT_CAPACITY, DEFAULT_POLL_INTERVAL_MS, MAX_CONSECUTIVE_POLL_ERRORS};
use crate::definition::{Definition, InteractionPattern, Params, RunResult};
use crate::events::{Event, EventBus};
use crate::metrics::MetricsCollector;
use slot::Slot;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Used when a polling definition doesn't declare an interval.
    pub default_poll_interval: Duration,
    /// Consecutive transport failures tolerated by a polling loop.
    pub max_consecutive_poll_errors: u32,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_consecutive_poll_errors: MAX_CONSECUTIVE_POLL_ERRORS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// How a strategy finished, before it is committed to the slot.
pub(crate) enum Settled {
    Rendered {
        result: RunResult,
        upstream: Option<Value>,
    },
    /// Partial output followed by a server-flagged error.
    Interrupted {
        result: RunResult,
        upstream: Option<Value>,
        error: RunError,
    },
    Failed(RunError),
    Cancelled,
}

/// Everything a strategy needs to know about the operation it runs.
pub(crate) struct Run<'a> {
    pub(crate) slot: SlotId,
    pub(crate) generation: u64,
    pub(crate) definition: &'a Definition,
    pub(crate) sent: &'a SentRequest,
    pub(crate) token: &'a CancelToken,
}

/// Explicit engine context: slots, backend and event bus.
pub struct Engine {
    backend: Arc<dyn Backend>,
    slots: [Mutex<Slot>; 3],
    events: EventBus,
    config: EngineConfig,
    generation: AtomicU64,
}

impl Engine {
    pub fn new(backend: Arc<dyn Backend>, config: EngineConfig) -> Self {
        Self {
            backend,
            slots: SlotId::ALL.map(|id| Mutex::new(Slot::new(id))),
            events: EventBus::new(config.event_capacity),
            config,
            generation: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn slot(&self, id: SlotId) -> MutexGuard<'_, Slot> {
        self.slots[id.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-only copy of a slot's state.
    pub fn snapshot(&self, id: SlotId) -> SlotSnapshot {
        self.slot(id).snapshot()
    }

    /// Bind a definition, cancelling whatever the slot was doing.
    pub fn bind(&self, id: SlotId, definition: Definition) -> Arc<Definition> {
        let definition = Arc::new(definition);
        {
            let mut slot = self.slot(id);
            if slot.abort() {
                debug!(slot = %id, "rebinding cancelled in-flight work");
            }
            slot.definition = Some(Arc::clone(&definition));
        }
        info!(slot = %id, definition = %definition.id, "definition bound");
        self.events.emit(Event::DefinitionBound {
            slot: id,
            definition: definition.id.clone(),
        });
        definition
    }

    /// Fetch a definition from the backend and bind it. On failure the
    /// slot is left as it was.
    pub async fn load(&self, id: SlotId, definition_id: &str) -> Result<Arc<Definition>> {
        info!(slot = %id, definition = definition_id, "loading definition");
        let definition = self.backend.fetch_definition(definition_id).await?;
        Ok(self.bind(id, definition))
    }

    /// Cancel in-flight work and clear the binding and last exchange.
    pub fn reset(&self, id: SlotId) {
        {
            let mut slot = self.slot(id);
            slot.abort();
            slot.definition = None;
            slot.last = None;
        }
        info!(slot = %id, "slot reset");
        self.events.emit(Event::SlotReset { slot: id });
    }

    /// Signal the slot's in-flight operation to stop. Returns whether
    /// anything was running. The operation itself reports `Cancelled` once
    /// it has wound down.
    pub fn cancel(&self, id: SlotId) -> bool {
        let cancelled = self.slot(id).abort();
        if cancelled {
            info!(slot = %id, "cancellation requested");
        }
        cancelled
    }

    /// Drive one request on `id` to a terminal outcome.
    pub async fn dispatch(&self, id: SlotId, params: Params) -> Completion {
        let mut metrics = MetricsCollector::start();

        let (definition, generation, token) = {
            let mut slot = self.slot(id);
            let Some(definition) = slot.definition.clone() else {
                drop(slot);
                return self.report(id, Outcome::Failed(RunError::Unbound(id)), &metrics);
            };
            if slot.abort() {
                debug!(slot = %id, "replacing in-flight operation");
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let (handle, token) = CancelHandle::new(generation);
            slot.handle = Some(handle);
            (definition, generation, token)
        };

        let sent = SentRequest {
            definition_id: definition.id.clone(),
            params,
        };
        let pattern = definition.pattern();
        info!(
            slot = %id,
            definition = %definition.id,
            pattern = %pattern,
            params = ?sent.params,
            "submitting request"
        );
        self.events.emit(Event::Submitted {
            slot: id,
            definition: definition.id.clone(),
            pattern,
        });

        let run = Run {
            slot: id,
            generation,
            definition: &definition,
            sent: &sent,
            token: &token,
        };
        let settled = match pattern {
            InteractionPattern::Sync | InteractionPattern::Polling => {
                self.run_submit(&run, &mut metrics).await
            }
            InteractionPattern::Streaming => self.run_stream(&run, &mut metrics).await,
        };

        let outcome = self.settle(&run, settled);
        self.report(id, outcome, &metrics)
    }

    /// Re-send the slot's last committed parameters against its current
    /// definition. `None` when nothing has been sent yet.
    pub async fn replay(&self, id: SlotId) -> Option<Completion> {
        let params = self.slot(id).last.as_ref()?.sent.params.clone();
        info!(slot = %id, "replaying last request");
        Some(self.dispatch(id, params).await)
    }

    /// Mark the slot as owned by a polling loop. No-op if the operation was
    /// superseded.
    pub(crate) fn set_polling(&self, run: &Run<'_>, polling: bool) {
        let mut slot = self.slot(run.slot);
        if slot.owned_by(run.generation) {
            slot.polling = polling;
        }
    }

    /// Terminal transition: release the handle and commit the exchange
    /// when there is a result to commit.
    /// Runs under the slot lock so a concurrent cancel either lands before
    /// (and wins) or after (and finds nothing to cancel).
    fn settle(&self, run: &Run<'_>, settled: Settled) -> Outcome {
        let mut slot = self.slot(run.slot);
        let cancelled = run.token.is_cancelled();
        if slot.owned_by(run.generation) {
            slot.handle = None;
            slot.polling = false;
        }
        if cancelled {
            return Outcome::Cancelled;
        }
        match settled {
            Settled::Rendered { result, upstream } => {
                slot.last = Some(Exchange {
                    sent: run.sent.clone(),
                    upstream,
                    response: result.response.clone(),
                });
                Outcome::Rendered(result)
            }
            Settled::Interrupted {
                result,
                upstream,
                error,
            } => {
                slot.last = Some(Exchange {
                    sent: run.sent.clone(),
                    upstream,
                    response: result.response.clone(),
                });
                Outcome::Interrupted { result, error }
            }
            Settled::Failed(err) => Outcome::Failed(err),
            Settled::Cancelled => Outcome::Cancelled,
        }
    }

    fn report(&self, id: SlotId, outcome: Outcome, metrics: &MetricsCollector) -> Completion {
        let metrics = metrics.finish();
        match &outcome {
            Outcome::Rendered(result) => {
                info!(
                    slot = %id,
                    outputs = result.outputs.len(),
                    total_ms = metrics.total_time.map(|d| d.as_millis() as u64),
                    "result rendered"
                );
                self.events.emit(Event::Completed {
                    slot: id,
                    result: result.clone(),
                    metrics: metrics.clone(),
                });
            }
            Outcome::Interrupted { result, error } => {
                warn!(slot = %id, %error, "request interrupted, keeping partial result");
                self.events.emit(Event::Interrupted {
                    slot: id,
                    result: result.clone(),
                    error: error.clone(),
                    metrics: metrics.clone(),
                });
            }
            Outcome::Failed(error) => {
                warn!(slot = %id, %error, "request failed");
                self.events.emit(Event::Failed {
                    slot: id,
                    error: error.clone(),
                    metrics: metrics.clone(),
                });
            }
            Outcome::Cancelled => {
                info!(slot = %id, "request cancelled");
                self.events.emit(Event::Cancelled { slot: id });
            }
        }
        Completion {
            slot: id,
            outcome,
            metrics,
        }
    }
}
