//! Notification sink used for every message the execution layer emits.
//!
//! The executors never print; they report through an [`EventSink`]. The default sink
//! forwards to `tracing`, so a subscriber installed by the application decides where
//! messages go.

use std::sync::{Arc, Mutex};

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventLevel {
    Debug,
    Status,
    Warning,
    Error,
}

/// Receiver for debug, status, warning and error notifications.
pub trait EventSink: Send + Sync {
    fn debug(&self, message: &str);
    fn status(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);

    fn emit(&self, level: EventLevel, message: &str) {
        match level {
            EventLevel::Debug => self.debug(message),
            EventLevel::Status => self.status(message),
            EventLevel::Warning => self.warning(message),
            EventLevel::Error => self.error(message),
        }
    }
}

/// Forwards events to `tracing` under the `resilient_sql` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "resilient_sql", "{message}");
    }

    fn status(&self, message: &str) {
        tracing::info!(target: "resilient_sql", "{message}");
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "resilient_sql", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "resilient_sql", "{message}");
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(EventLevel, String)>>,
}

impl RecordingEvents {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<(EventLevel, String)> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Messages recorded at `level`.
    #[must_use]
    pub fn messages(&self, level: EventLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(lvl, _)| *lvl == level)
            .map(|(_, msg)| msg)
            .collect()
    }

    fn push(&self, level: EventLevel, message: &str) {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((level, message.to_string()));
    }
}

impl EventSink for RecordingEvents {
    fn debug(&self, message: &str) {
        self.push(EventLevel::Debug, message);
    }

    fn status(&self, message: &str) {
        self.push(EventLevel::Status, message);
    }

    fn warning(&self, message: &str) {
        self.push(EventLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(EventLevel::Error, message);
    }
}

/// Sink used when the caller does not supply one.
#[must_use]
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingEvents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order_and_levels() {
        let sink = RecordingEvents::new();
        sink.status("connecting");
        sink.emit(EventLevel::Warning, "slow");
        sink.error("failed");

        assert_eq!(
            sink.events(),
            vec![
                (EventLevel::Status, "connecting".to_string()),
                (EventLevel::Warning, "slow".to_string()),
                (EventLevel::Error, "failed".to_string()),
            ]
        );
        assert_eq!(sink.messages(EventLevel::Error), vec!["failed".to_string()]);
    }
}
