//! In-memory helpers for testing.
//!
//! Available behind the `test-utils` feature flag.

mod event_collector;
mod recording_observer;

pub use event_collector::EventCollector;
pub use recording_observer::RecordingObserver;
