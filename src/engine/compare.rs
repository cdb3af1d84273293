//! Side-by-side execution of the `left` and `right` slots.

use tracing::info;

use super::{CompareOutcome, Engine, SlotId};
use crate::definition::Params;
use crate::events::Event;

impl Engine {
    /// Dispatch both compare slots concurrently and wait for both to
    /// settle. Each side has its own parameters, cancellation handle and
    /// metrics; one side failing never short-circuits the other.
    pub async fn compare(&self, left: Params, right: Params) -> CompareOutcome {
        info!("starting compare run");
        let (left, right) = tokio::join!(
            self.dispatch(SlotId::Left, left),
            self.dispatch(SlotId::Right, right),
        );
        info!(
            left_ok = left.outcome.is_rendered(),
            right_ok = right.outcome.is_rendered(),
            "compare run settled"
        );
        self.events.emit(Event::CompareSettled);
        CompareOutcome { left, right }
    }

    /// Cancel both compare slots.
    pub fn cancel_compare(&self) -> bool {
        let left = self.cancel(SlotId::Left);
        let right = self.cancel(SlotId::Right);
        left || right
    }
}
