//! Key-value settings storage backed by SQLite.
//!
//! Holds front-end settings that outlive a single run, such as the proxy
//! address. Engine tuning that a definition can override lives in
//! [`EngineConfig`](crate::engine::EngineConfig) instead.

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Address of the playground proxy.
pub const KEY_BASE_URL: &str = "base_url";
/// Poll interval for definitions that don't declare one, in milliseconds.
pub const KEY_POLL_INTERVAL_MS: &str = "poll_interval_ms";

/// Keys `set` accepts.
pub const KNOWN_KEYS: &[&str] = &[KEY_BASE_URL, KEY_POLL_INTERVAL_MS];

/// Persistent key-value configuration store.
pub struct Config {
    conn: Mutex<Connection>,
}

impl Config {
    /// Open or create the config table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open config database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .context("failed to create config table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("config connection poisoned"))
    }

    /// Get a config value by key.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Set a config value (upsert). Unknown keys and malformed values are
    /// rejected.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Remove a config key.
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM config WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Configured proxy address, if any.
    pub fn base_url(&self) -> Result<Option<String>> {
        self.get(KEY_BASE_URL)
    }

    /// Configured default poll interval, if any.
    pub fn poll_interval(&self) -> Result<Option<Duration>> {
        self.get(KEY_POLL_INTERVAL_MS)?
            .map(|v| parse_interval(&v))
            .transpose()
    }
}

fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        KEY_BASE_URL => {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                bail!("{key} must be an http(s) URL, got '{value}'");
            }
        }
        KEY_POLL_INTERVAL_MS => {
            parse_interval(value)?;
        }
        _ => bail!("unknown config key '{key}' (known: {})", KNOWN_KEYS.join(", ")),
    }
    Ok(())
}

fn parse_interval(value: &str) -> Result<Duration> {
    let ms: u64 = value
        .parse()
        .with_context(|| format!("{KEY_POLL_INTERVAL_MS} must be a whole number, got '{value}'"))?;
    if ms == 0 {
        bail!("{KEY_POLL_INTERVAL_MS} must be positive");
    }
    Ok(Duration::from_millis(ms))
}
