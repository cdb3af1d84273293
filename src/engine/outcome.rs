use thiserror::Error;

use super::slot::SlotId;
use crate::definition::RunResult;
use crate::metrics::Metrics;

/// Why an execution failed. Cancellation is deliberately not here: an
/// abandoned operation is not a failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Application(String),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("gave up after {attempts} consecutive poll errors")]
    PollBudgetExhausted { attempts: u32 },

    #[error("submission did not return a request id")]
    MissingRequestId,

    #[error("no definition bound to slot {0}")]
    Unbound(SlotId),
}

/// Terminal state of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Rendered(RunResult),
    /// The server flagged an error after some output was delivered. The
    /// partial result is kept and committed alongside the error.
    Interrupted { result: RunResult, error: RunError },
    Failed(RunError),
    Cancelled,
}

impl Outcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }

    pub fn result(&self) -> Option<&RunResult> {
        match self {
            Self::Rendered(result) | Self::Interrupted { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RunError> {
        match self {
            Self::Failed(err) | Self::Interrupted { error: err, .. } => Some(err),
            _ => None,
        }
    }
}

/// A dispatch's outcome plus the measurements taken along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub slot: SlotId,
    pub outcome: Outcome,
    pub metrics: Metrics,
}

/// Both sides of a compare run, after both have settled.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareOutcome {
    pub left: Completion,
    pub right: Completion,
}
