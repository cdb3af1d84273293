//! Single round trip: sync calls and polling job submissions.

use tracing::{debug, info};

use super::{Engine, Run, RunError, Settled};
use crate::definition::{InteractionPattern, RunResult};
use crate::events::Event;
use crate::metrics::MetricsCollector;

impl Engine {
    /// Submit once. A polling definition must get a request id back and
    /// continues in the polling loop. A sync response that carries a request
    /// id anyway is handed to the polling loop as well.
    pub(crate) async fn run_submit(&self, run: &Run<'_>, metrics: &mut MetricsCollector) -> Settled {
        let submitted = tokio::select! {
            biased;
            _ = run.token.cancelled() => return Settled::Cancelled,
            resp = self.backend.submit(run.sent) => resp,
        };
        metrics.mark_submitted();

        let resp = match submitted {
            Ok(resp) => resp,
            Err(e) => return Settled::Failed(RunError::Transport(format!("{e:#}"))),
        };

        info!(slot = %run.slot, status = resp.status, "response received");
        self.events.emit(Event::ResponseStatus {
            slot: run.slot,
            status: resp.status,
        });

        if let Some(error) = resp.error {
            return Settled::Failed(RunError::Application(error));
        }

        let request_id = resp.request_id.filter(|id| !id.is_empty());
        match (run.definition.pattern(), request_id) {
            (_, Some(request_id)) => {
                if run.definition.pattern() == InteractionPattern::Sync {
                    debug!(slot = %run.slot, %request_id, "sync response handed off to polling");
                }
                self.poll_job(run, request_id, resp.sent_request, metrics)
                    .await
            }
            (InteractionPattern::Polling, None) => Settled::Failed(RunError::MissingRequestId),
            (_, None) => Settled::Rendered {
                result: RunResult::from_parts(resp.outputs, resp.response),
                upstream: resp.sent_request,
            },
        }
    }
}
