//! Analytics events.
//!
//! The coordinator reports registrations, builds and runs through an
//! [`EventSink`]. Events are a side call: emitting never affects the outcome
//! of the operation that produced them.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

use parking_lot::RwLock;
use std::sync::Arc;

/// A new pipeline version was registered.
pub const PIPELINE_REGISTERED: &str = "pipeline.registered";
/// A build was requested.
pub const PIPELINE_BUILD: &str = "pipeline.build";
/// A deployment was dispatched to a stack.
pub const PIPELINE_RUN: &str = "pipeline.run";

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = parking_lot::const_rwlock(None);

/// Sets the process-wide event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the process-wide event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Returns the process-wide event sink, or a [`NoOpEventSink`] if none is set.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_global_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        set_event_sink(sink.clone());
        get_event_sink().try_emit("test.global_sink", None);
        clear_event_sink();
        get_event_sink().try_emit("test.global_sink", None);

        assert_eq!(sink.events_of_type("test.global_sink").len(), 1);
    }
}
