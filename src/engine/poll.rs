//! Job status polling.
//!
//! The loop queries the status endpoint at a fixed interval until the job
//! settles, the slot is cancelled or the consecutive-error budget runs out.
//! Cancellation is checked before every query and while sleeping, never in
//! the middle of a query.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Engine, Run, RunError, Settled};
use crate::definition::RunResult;
use crate::events::Event;
use crate::metrics::MetricsCollector;

/// Job state as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
    Failed,
}

impl JobStatus {
    /// `done` and `failed`/`error` are terminal. Anything else, including
    /// statuses we've never seen, keeps the job running.
    pub fn parse(status: &str) -> Self {
        match status {
            "done" => Self::Done,
            "failed" | "error" => Self::Failed,
            _ => Self::Running,
        }
    }
}

impl Engine {
    pub(crate) async fn poll_job(
        &self,
        run: &Run<'_>,
        request_id: String,
        upstream: Option<Value>,
        metrics: &mut MetricsCollector,
    ) -> Settled {
        let interval = run.definition.poll_interval(self.config.default_poll_interval);
        let budget = self.config.max_consecutive_poll_errors;

        info!(
            slot = %run.slot,
            %request_id,
            interval_ms = interval.as_millis() as u64,
            "job submitted, polling"
        );
        self.events.emit(Event::JobQueued {
            slot: run.slot,
            request_id: request_id.clone(),
            interval_ms: interval.as_millis() as u64,
        });
        self.set_polling(run, true);

        let mut consecutive_errors = 0u32;
        loop {
            if run.token.is_cancelled() {
                return Settled::Cancelled;
            }

            metrics.record_poll();
            let poll_count = metrics.poll_count();
            match self
                .backend
                .poll_status(&run.definition.id, &request_id)
                .await
            {
                Ok(resp) => {
                    consecutive_errors = 0;
                    debug!(slot = %run.slot, status = %resp.poll_status, poll_count, "poll status");
                    self.events.emit(Event::PollStatus {
                        slot: run.slot,
                        status: resp.poll_status.clone(),
                        poll_count,
                    });
                    match JobStatus::parse(&resp.poll_status) {
                        JobStatus::Done => break,
                        JobStatus::Failed => {
                            let message = resp
                                .error
                                .unwrap_or_else(|| format!("status '{}'", resp.poll_status));
                            return Settled::Failed(RunError::JobFailed(message));
                        }
                        // The proxy answers an unknown job or definition with
                        // an error and no status. That never becomes `done`.
                        JobStatus::Running => {
                            if let Some(error) = resp.error {
                                warn!(slot = %run.slot, %error, "status query rejected");
                                return Settled::Failed(RunError::Application(error));
                            }
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let message = format!("{e:#}");
                    warn!(slot = %run.slot, consecutive_errors, error = %message, "poll error");
                    self.events.emit(Event::PollError {
                        slot: run.slot,
                        message,
                        consecutive: consecutive_errors,
                    });
                    if consecutive_errors >= budget {
                        return Settled::Failed(RunError::PollBudgetExhausted {
                            attempts: consecutive_errors,
                        });
                    }
                }
            }

            tokio::select! {
                biased;
                _ = run.token.cancelled() => return Settled::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(slot = %run.slot, %request_id, "job complete, fetching result");
        let fetched = tokio::select! {
            biased;
            _ = run.token.cancelled() => return Settled::Cancelled,
            resp = self.backend.fetch_result(&run.definition.id, &request_id) => resp,
        };

        match fetched {
            Ok(resp) => match resp.error {
                Some(error) => Settled::Failed(RunError::Application(error)),
                None => {
                    if resp.outputs.is_empty() {
                        warn!(slot = %run.slot, "no outputs extracted from response");
                    }
                    Settled::Rendered {
                        result: RunResult::from_parts(resp.outputs, resp.response),
                        upstream,
                    }
                }
            },
            Err(e) => Settled::Failed(RunError::Transport(format!(
                "failed to fetch result: {e:#}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert_eq!(JobStatus::parse("done"), JobStatus::Done);
        assert_eq!(JobStatus::parse("failed"), JobStatus::Failed);
        assert_eq!(JobStatus::parse("error"), JobStatus::Failed);
    }

    #[test]
    fn unknown_statuses_keep_running() {
        for status in ["running", "pending", "IN_QUEUE", ""] {
            assert_eq!(JobStatus::parse(status), JobStatus::Running);
        }
    }
}
