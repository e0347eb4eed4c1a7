//! In-memory capture of recent log lines.
//!
//! A tracing layer copies every event into a bounded ring buffer so owners
//! can read recent bot activity from chat with the `logs` command.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A single captured log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: tracing::Level,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    /// Format as a single line for display
    pub fn format(&self) -> String {
        format!(
            "{} {:>5} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.target,
            self.message
        )
    }
}

/// Ring buffer holding the most recent log entries
pub struct LogBuffer {
    recent: parking_lot::RwLock<VecDeque<LogEntry>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            recent: parking_lot::RwLock::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut recent = self.recent.write();
        if recent.len() >= self.max_entries {
            recent.pop_front();
        }
        recent.push_back(entry);
    }

    /// Up to `count` most recent entries, oldest first
    pub fn get_recent(&self, count: usize) -> Vec<LogEntry> {
        let recent = self.recent.read();
        let start = recent.len().saturating_sub(count);
        recent.iter().skip(start).cloned().collect()
    }

    /// Recent entries at `min_level` or more severe
    pub fn get_recent_at(&self, count: usize, min_level: tracing::Level) -> Vec<LogEntry> {
        let recent = self.recent.read();
        let mut entries: Vec<LogEntry> = recent
            .iter()
            .rev()
            .filter(|e| e.level <= min_level)
            .take(count)
            .cloned()
            .collect();
        entries.reverse();
        entries
    }
}

pub type SharedLogBuffer = Arc<LogBuffer>;

pub fn create_log_buffer(max_entries: usize) -> SharedLogBuffer {
    Arc::new(LogBuffer::new(max_entries))
}

/// Tracing layer that copies events into a [`LogBuffer`]
pub struct LogCaptureLayer {
    buffer: SharedLogBuffer,
}

impl LogCaptureLayer {
    pub fn new(buffer: SharedLogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.finish(),
        });
    }
}

/// Collects the `message` field plus any structured fields
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }
}
