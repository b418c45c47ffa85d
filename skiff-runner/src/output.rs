//! Task output sink
//!
//! Collects the combined output of every command a task runs, plus the
//! task's own progress notes. Only the most recent lines are retained so a
//! chatty script cannot grow memory without bound.

use chrono::Utc;
use skiff_core::domain::log::{LogEntry, LogLevel};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lines retained per task by default
pub const DEFAULT_CAPACITY: usize = 5000;

#[derive(Debug)]
struct Inner {
    lines: VecDeque<LogEntry>,
    capacity: usize,
    /// Bytes of an unterminated line, keyed by stream level
    partial: Vec<(LogLevel, String)>,
    /// Total lines ever written, including dropped ones
    written: u64,
}

/// Bounded, line-oriented output buffer shared by a task and its runners
#[derive(Debug, Clone)]
pub struct TaskOutput {
    inner: Arc<Mutex<Inner>>,
}

impl TaskOutput {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                lines: VecDeque::new(),
                capacity: capacity.max(1),
                partial: Vec::new(),
                written: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends raw stream bytes; complete lines become entries
    pub fn write(&self, level: LogLevel, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let mut inner = self.lock();

        let pending = inner.partial.iter().position(|(l, _)| *l == level);
        let mut buffer = match pending {
            Some(i) => inner.partial.swap_remove(i).1,
            None => String::new(),
        };
        buffer.push_str(&text);

        let mut rest = buffer.as_str();
        while let Some(pos) = rest.find('\n') {
            let line = rest[..pos].trim_end_matches('\r').to_string();
            inner.push(level, line);
            rest = &rest[pos + 1..];
        }

        if !rest.is_empty() {
            inner.partial.push((level, rest.to_string()));
        }
    }

    /// Appends one complete line
    pub fn line(&self, level: LogLevel, message: impl Into<String>) {
        self.lock().push(level, message.into());
    }

    /// Re-adds entries captured by an earlier attempt, keeping their
    /// timestamps
    pub fn restore(&self, entries: impl IntoIterator<Item = LogEntry>) {
        let mut inner = self.lock();
        for entry in entries {
            if inner.lines.len() == inner.capacity {
                inner.lines.pop_front();
            }
            inner.lines.push_back(entry);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.line(LogLevel::Info, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.line(LogLevel::Error, message);
    }

    /// Terminates any unfinished line so it becomes visible
    pub fn flush(&self) {
        let mut inner = self.lock();
        let partial = std::mem::take(&mut inner.partial);
        for (level, text) in partial {
            inner.push(level, text);
        }
    }

    /// Copy of the retained lines, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().lines.iter().cloned().collect()
    }

    /// Last `n` retained lines of the given level joined with newlines
    pub fn tail(&self, level: LogLevel, n: usize) -> String {
        let inner = self.lock();
        let mut lines: Vec<&str> = inner
            .lines
            .iter()
            .rev()
            .filter(|e| e.level == level)
            .take(n)
            .map(|e| e.message.as_str())
            .collect();
        lines.reverse();
        lines.join("\n")
    }

    pub fn written(&self) -> u64 {
        self.lock().written
    }
}

impl Default for TaskOutput {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Inner {
    fn push(&mut self, level: LogLevel, message: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
        self.written += 1;
    }
}
