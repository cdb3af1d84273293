//! Project-wide constants.

use std::path::PathBuf;
use std::time::Duration;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Address of the playground proxy when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Poll interval used when a definition doesn't declare one.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Consecutive transport failures a polling loop tolerates.
pub const MAX_CONSECUTIVE_POLL_ERRORS: u32 = 10;

/// Capacity of the lifecycle event channel. Streams emit one event per
/// token, so this is larger than a typical control channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default database path: `~/.arena/arena.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".arena")
        .join("arena.db")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Human-readable duration: `850ms`, `1.25s`, `2m 05s`.
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.2}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
