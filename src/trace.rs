use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::util::unix_millis;

/// Ring buffer capacity of a [`TraceSink`].
pub const TRACE_CAPACITY: usize = 256;

/// Environment variable that opts into tracing at client construction.
pub const TRACE_ENV_VAR: &str = "REFETCH_TRACE";

/// The lifecycle points a fetch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEventKind {
    /// A logical fetch began.
    Start,
    /// An attempt failed and the policy was consulted.
    RetryCheck,
    /// Backoff delay before the next attempt.
    RetryWait,
    /// The fetch settled with data.
    Success,
    /// The fetch settled with a terminal error.
    Failure,
}

impl TraceEventKind {
    /// Wire label for the kind.
    pub fn label(&self) -> &'static str {
        match self {
            TraceEventKind::Start => "start",
            TraceEventKind::RetryCheck => "retry-check",
            TraceEventKind::RetryWait => "retry-wait",
            TraceEventKind::Success => "success",
            TraceEventKind::Failure => "failure",
        }
    }
}

/// One recorded fetch lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// What happened.
    pub kind: TraceEventKind,
    /// Stable hash of the query key ([`crate::QueryKey::hash64`]).
    pub query: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Free-form detail string.
    pub details: String,
}

/// Opt-in, bounded recording of fetch lifecycle events.
///
/// Owned by the client. Disabled sinks drop events without recording.
/// The ring keeps the newest [`TRACE_CAPACITY`] events, dropping the oldest
/// on overflow. Every recorded event is also logged through [`tracing`].
pub struct TraceSink {
    enabled: Cell<bool>,
    capacity: usize,
    events: RefCell<VecDeque<TraceEvent>>,
}

impl TraceSink {
    pub(crate) fn new() -> Self {
        let enabled = std::env::var(TRACE_ENV_VAR)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        TraceSink {
            enabled: Cell::new(enabled),
            capacity: TRACE_CAPACITY,
            events: RefCell::new(VecDeque::new()),
        }
    }

    /// Turn recording on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    /// Whether events are currently recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub(crate) fn emit(&self, kind: TraceEventKind, query: u64, details: impl Into<String>) {
        if !self.enabled.get() {
            return;
        }
        let details = details.into();
        tracing::debug!(
            target: "refetch::trace",
            kind = kind.label(),
            query,
            details = %details,
        );
        let mut events = self.events.try_borrow_mut().expect("trace emit borrow_mut");
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(TraceEvent {
            kind,
            query,
            timestamp_ms: unix_millis(),
            details,
        });
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .try_borrow()
            .expect("trace events borrow")
            .iter()
            .cloned()
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.try_borrow().expect("trace len borrow").len()
    }

    /// Whether no events are recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events
            .try_borrow_mut()
            .expect("trace clear borrow_mut")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_sink() -> TraceSink {
        let sink = TraceSink::new();
        sink.set_enabled(true);
        sink
    }

    #[test]
    fn disabled_sink_records_nothing() {
        let sink = TraceSink::new();
        sink.set_enabled(false);
        sink.emit(TraceEventKind::Start, 1, "ignored");
        assert!(sink.is_empty());
    }

    #[test]
    fn ring_drops_oldest_on_overflow() {
        let sink = enabled_sink();
        for i in 0..(TRACE_CAPACITY + 10) {
            sink.emit(TraceEventKind::Start, i as u64, "");
        }
        let events = sink.events();
        assert_eq!(events.len(), TRACE_CAPACITY);
        assert_eq!(events.first().map(|e| e.query), Some(10));
        assert_eq!(
            events.last().map(|e| e.query),
            Some((TRACE_CAPACITY + 9) as u64)
        );
    }

    #[test]
    fn kind_labels() {
        assert_eq!(TraceEventKind::RetryCheck.label(), "retry-check");
        assert_eq!(TraceEventKind::RetryWait.label(), "retry-wait");
    }
}
