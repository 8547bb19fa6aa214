//! `Log` implementations: forwarding to the `log` crate, and in-memory capture.

use std::sync::Mutex;

use log::Level;

use crate::plugin::Log;

/// Forwards diagnostics to the `log` facade under the `mobi` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateSink;

impl Log for LogCrateSink {
    fn debug(&self, message: &str) {
        log::debug!(target: "mobi", "{}", message);
    }

    fn warn(&self, message: &str) {
        log::warn!(target: "mobi", "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: "mobi", "{}", message);
    }
}

/// Captures diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Level, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Messages logged at the given level.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    /// Whether any message at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.messages(level).iter().any(|m| m.contains(needle))
    }

    fn push(&self, level: Level, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, message.to_string()));
        }
    }
}

impl Log for MemoryLog {
    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }
}
