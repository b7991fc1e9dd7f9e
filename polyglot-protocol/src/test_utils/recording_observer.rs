//! RecordingObserver: records every value published on a subject.

use crate::subject::{Subject, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;

/// Subscribes to a [`Subject`] and keeps a copy of everything it sees.
/// Recording stops when the observer is dropped.
pub struct RecordingObserver<T> {
    values: Arc<Mutex<Vec<T>>>,
    _subscription: Subscription,
}

impl<T: Clone + Send + 'static> RecordingObserver<T> {
    /// Start recording `subject`.
    pub fn attach(subject: &Subject<T>) -> Self {
        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&values);
        let subscription = subject.subscribe(move |value: &T| sink.lock().push(value.clone()));
        Self {
            values,
            _subscription: subscription,
        }
    }

    /// Snapshot of everything recorded so far.
    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    /// Number of values recorded.
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}
