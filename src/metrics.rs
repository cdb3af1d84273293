//! Latency and throughput figures for one execution.
//!
//! A [`MetricsCollector`] is created when dispatch starts and timestamped
//! along whichever path runs. [`MetricsCollector::finish`] produces a
//! [`Metrics`] record where only the fields meaningful for that path are
//! present.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    /// Request issued to initial response envelope (sync and job submission).
    pub submit_time: Option<Duration>,
    /// Stream start to first non-empty token.
    pub ttft: Option<Duration>,
    /// Token fragments received (streaming only).
    pub token_count: Option<u64>,
    /// Dispatch start to terminal state. Covers submission and, for jobs,
    /// every status query and wait in the polling loop.
    pub total_time: Option<Duration>,
    /// Present only when both `token_count` and `total_time` are positive.
    pub tokens_per_sec: Option<f64>,
    /// Status queries issued (polling only).
    pub poll_count: Option<u32>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    submit_time: Option<Duration>,
    stream_started: Option<Instant>,
    ttft: Option<Duration>,
    tokens: u64,
    polls: Option<u32>,
}

impl MetricsCollector {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            submit_time: None,
            stream_started: None,
            ttft: None,
            tokens: 0,
            polls: None,
        }
    }

    /// The initial response envelope arrived.
    pub fn mark_submitted(&mut self) {
        self.submit_time = Some(self.started.elapsed());
    }

    pub fn start_stream(&mut self) {
        self.stream_started = Some(Instant::now());
    }

    /// Count a token. Empty fragments neither count nor anchor TTFT.
    pub fn record_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        self.tokens += 1;
        if self.ttft.is_none()
            && let Some(start) = self.stream_started
        {
            self.ttft = Some(start.elapsed());
        }
    }

    pub fn record_poll(&mut self) {
        *self.polls.get_or_insert(0) += 1;
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.unwrap_or(0)
    }

    pub fn finish(&self) -> Metrics {
        let total = self.started.elapsed();
        let streaming = self.stream_started.is_some();
        let token_count = streaming.then_some(self.tokens);
        let tokens_per_sec = match token_count {
            Some(n) if n > 0 && !total.is_zero() => Some(n as f64 / total.as_secs_f64()),
            _ => None,
        };

        Metrics {
            submit_time: self.submit_time,
            ttft: self.ttft,
            token_count,
            total_time: Some(total),
            tokens_per_sec,
            poll_count: self.polls,
        }
    }
}
