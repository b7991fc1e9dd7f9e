#![deny(missing_docs)]
//! Single-flight FIFO scheduler for polyglot kernels.
//!
//! A [`KernelScheduler`] runs one operation at a time, in the order the
//! operations were scheduled. Every kernel in a tree shares one scheduler,
//! which is what lets handler code mutate kernel state without locking.
//!
//! Operations carry an optional *scope*. An operation scheduled while an
//! operation with the same scope is in flight runs inline instead of
//! queueing behind it; kernels use the command token as the scope, so a
//! command sent from inside a handler for the same root command does not
//! deadlock waiting for its own parent.
//!
//! Cancellation is cooperative. [`KernelScheduler::cancel_current_operation`]
//! rejects the in-flight operation's result immediately and triggers its
//! [`CancellationToken`], but the next queued operation only starts once
//! the cancelled executor has actually returned.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
pub use tokio_util::sync::CancellationToken;

/// Scheduler errors.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The operation was cancelled while in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The executor panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),

    /// The scheduler went away before the operation completed.
    #[error("scheduler dropped")]
    Dropped,
}

type Completion<U> = Arc<Mutex<Option<oneshot::Sender<Result<U, SchedulerError>>>>>;
type Executor<T, U> = Box<dyn FnOnce(T, CancellationToken) -> BoxFuture<'static, U> + Send>;

struct Operation<T, U> {
    value: T,
    scope: Option<String>,
    executor: Executor<T, U>,
    completion: Completion<U>,
}

struct InFlight<U> {
    scope: Option<String>,
    cancel: CancellationToken,
    completion: Completion<U>,
}

struct State<T, U> {
    queue: VecDeque<Operation<T, U>>,
    in_flight: Option<InFlight<U>>,
    pumping: bool,
}

/// A FIFO executor that keeps at most one operation in flight.
pub struct KernelScheduler<T, U> {
    state: Arc<Mutex<State<T, U>>>,
}

impl<T, U> Clone for KernelScheduler<T, U> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

impl<T: Send + 'static, U: Send + 'static> KernelScheduler<T, U> {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                in_flight: None,
                pumping: false,
            })),
        }
    }

    /// Enqueue `value` for `executor` and return a future for its result.
    ///
    /// The position in the queue is taken when this method is called, not
    /// when the returned future is first polled. Must be called from
    /// within a tokio runtime.
    pub fn schedule<F>(
        &self,
        value: T,
        scope: Option<String>,
        executor: F,
    ) -> BoxFuture<'static, Result<U, SchedulerError>>
    where
        F: FnOnce(T, CancellationToken) -> BoxFuture<'static, U> + Send + 'static,
    {
        let mut state = self.state.lock();

        let nested = state
            .in_flight
            .as_ref()
            .filter(|current| scope.is_some() && current.scope == scope)
            .map(|current| current.cancel.child_token());
        if let Some(cancel) = nested {
            drop(state);
            tracing::trace!(scope = ?scope, "running nested operation inline");
            return async move { Ok(executor(value, cancel).await) }.boxed();
        }

        let (tx, rx) = oneshot::channel();
        state.queue.push_back(Operation {
            value,
            scope,
            executor: Box::new(executor),
            completion: Arc::new(Mutex::new(Some(tx))),
        });
        if !state.pumping {
            state.pumping = true;
            tokio::spawn(Self::pump(Arc::clone(&self.state)));
        }
        drop(state);

        async move { rx.await.unwrap_or(Err(SchedulerError::Dropped)) }.boxed()
    }

    /// Schedule and wait for the result.
    pub async fn run<F>(&self, value: T, scope: Option<String>, executor: F) -> Result<U, SchedulerError>
    where
        F: FnOnce(T, CancellationToken) -> BoxFuture<'static, U> + Send + 'static,
    {
        self.schedule(value, scope, executor).await
    }

    /// Cancel the in-flight operation, if any, and return its scope.
    ///
    /// Its result is rejected with [`SchedulerError::Cancelled`] right
    /// away. Queued operations are left untouched.
    pub fn cancel_current_operation(&self) -> Option<Option<String>> {
        let state = self.state.lock();
        let current = state.in_flight.as_ref()?;
        current.cancel.cancel();
        if let Some(tx) = current.completion.lock().take() {
            let _ = tx.send(Err(SchedulerError::Cancelled));
        }
        tracing::debug!(scope = ?current.scope, "cancelled in-flight operation");
        Some(current.scope.clone())
    }

    /// Scope of the in-flight operation, if one is running.
    pub fn current_scope(&self) -> Option<Option<String>> {
        self.state
            .lock()
            .in_flight
            .as_ref()
            .map(|current| current.scope.clone())
    }

    /// Whether an operation is in flight.
    pub fn is_busy(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// Number of operations waiting behind the in-flight one.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    async fn pump(state: Arc<Mutex<State<T, U>>>) {
        loop {
            let cancel = CancellationToken::new();
            let op = {
                let mut guard = state.lock();
                match guard.queue.pop_front() {
                    Some(op) => {
                        guard.in_flight = Some(InFlight {
                            scope: op.scope.clone(),
                            cancel: cancel.clone(),
                            completion: Arc::clone(&op.completion),
                        });
                        op
                    }
                    None => {
                        guard.in_flight = None;
                        guard.pumping = false;
                        return;
                    }
                }
            };

            let future = (op.executor)(op.value, cancel);
            let result = match tokio::spawn(future).await {
                Ok(value) => Ok(value),
                Err(e) if e.is_panic() => {
                    let message = panic_message(&*e.into_panic());
                    tracing::error!(scope = ?op.scope, %message, "scheduled operation panicked");
                    Err(SchedulerError::Panicked(message))
                }
                Err(_) => Err(SchedulerError::Cancelled),
            };

            if let Some(tx) = op.completion.lock().take() {
                let _ = tx.send(result);
            }
            state.lock().in_flight = None;
        }
    }
}

impl<T: Send + 'static, U: Send + 'static> Default for KernelScheduler<T, U> {
    fn default() -> Self {
        Self::new()
    }
}
