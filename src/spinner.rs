//! Terminal spinner shown while a non-streaming request is in flight.

use std::io::Write;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::consts::format_duration;

/// Braille spinner frames.
const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Frame interval.
const INTERVAL: Duration = Duration::from_millis(80);

/// A stderr spinner with an updatable status line and elapsed time.
pub struct Spinner {
    handle: JoinHandle<()>,
    message: watch::Sender<String>,
    stop: watch::Sender<bool>,
}

impl Spinner {
    /// Start a spinner with the given message (e.g. `"submitting"`).
    pub fn start(message: &str) -> Self {
        let (message_tx, message_rx) = watch::channel(message.to_string());
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let started = Instant::now();

        let handle = tokio::spawn(async move {
            let mut i = 0;
            loop {
                let frame = FRAMES[i % FRAMES.len()];
                let line = render(frame, &message_rx.borrow(), started.elapsed());
                eprint!("\x1b[2K\r{line}");
                let _ = std::io::stderr().flush();

                tokio::select! {
                    _ = tokio::time::sleep(INTERVAL) => {}
                    _ = stop_rx.changed() => break,
                }
                i += 1;
            }
            eprint!("\x1b[2K\r");
            let _ = std::io::stderr().flush();
        });

        Self {
            handle,
            message: message_tx,
            stop: stop_tx,
        }
    }

    /// Replace the status text, e.g. with the latest poll status.
    pub fn update(&self, message: impl Into<String>) {
        self.message.send_replace(message.into());
    }

    /// Stop the spinner and clear its line.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

fn render(frame: &str, message: &str, elapsed: Duration) -> String {
    format!("{frame} {message} ({})", format_duration(elapsed))
}
