//! EventCollector: gathers kernel events and waits for terminal ones.

use crate::envelope::KernelEventEnvelope;
use crate::subject::{Subject, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;

/// Records event envelopes from a kernel event subject and lets a test
/// await a condition over them.
pub struct EventCollector {
    events: Arc<Mutex<Vec<KernelEventEnvelope>>>,
    notify: Arc<Notify>,
    _subscription: Subscription,
}

impl EventCollector {
    /// Start collecting from `subject`.
    pub fn attach(subject: &Subject<KernelEventEnvelope>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let sink = Arc::clone(&events);
        let wake = Arc::clone(&notify);
        let subscription = subject.subscribe(move |e: &KernelEventEnvelope| {
            sink.lock().push(e.clone());
            wake.notify_waiters();
        });
        Self {
            events,
            notify,
            _subscription: subscription,
        }
    }

    /// Snapshot of collected events.
    pub fn events(&self) -> Vec<KernelEventEnvelope> {
        self.events.lock().clone()
    }

    /// `eventType` tags of collected events, in order.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type().to_owned())
            .collect()
    }

    /// Wait until `predicate` holds over the collected events.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: Fn(&[KernelEventEnvelope]) -> bool,
    {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if predicate(&self.events.lock()) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `count` terminal events have been collected.
    pub async fn wait_for_terminals(&self, count: usize) {
        self.wait_until(|events| events.iter().filter(|e| e.is_terminal()).count() >= count)
            .await;
    }
}
