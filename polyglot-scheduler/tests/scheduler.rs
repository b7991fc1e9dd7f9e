use futures::FutureExt;
use polyglot_scheduler::{KernelScheduler, SchedulerError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

// --- Ordering ---

#[tokio::test]
async fn operations_start_in_submission_order() {
    let scheduler = KernelScheduler::<usize, usize>::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let futures: Vec<_> = (0..10)
        .map(|i| {
            let log = Arc::clone(&log);
            scheduler.schedule(i, None, move |value, _| {
                async move {
                    log.lock().await.push(value);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    value * 2
                }
                .boxed()
            })
        })
        .collect();

    let results = futures::future::join_all(futures).await;
    let results: Vec<usize> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    assert_eq!(*log.lock().await, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn never_two_operations_in_flight() {
    let scheduler = KernelScheduler::<(), ()>::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let futures: Vec<_> = (0..20)
        .map(|_| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            scheduler.schedule((), None, move |_, _| {
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
                .boxed()
            })
        })
        .collect();

    futures::future::join_all(futures).await;
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

// --- Failure ---

#[tokio::test]
async fn panicking_operation_does_not_stall_queue() {
    let scheduler = KernelScheduler::<u32, u32>::new();
    let first = scheduler.schedule(1, None, |v, _| {
        async move {
            if v == 1 {
                panic!("boom");
            }
            v
        }
        .boxed()
    });
    let second = scheduler.schedule(2, None, |v, _| async move { v }.boxed());

    assert!(matches!(first.await, Err(SchedulerError::Panicked(m)) if m == "boom"));
    assert_eq!(second.await, Ok(2));
}

// --- Reentrancy ---

#[tokio::test]
async fn same_scope_runs_inline() {
    let scheduler = KernelScheduler::<u32, u32>::new();
    let inner_scheduler = scheduler.clone();

    let outer = scheduler.run(1, Some("token".into()), move |v, _| {
        async move {
            let nested = inner_scheduler
                .run(10, Some("token".into()), |n, _| async move { n + 1 }.boxed())
                .await
                .unwrap();
            v + nested
        }
        .boxed()
    });

    let result = tokio::time::timeout(Duration::from_secs(5), outer)
        .await
        .expect("nested operation deadlocked");
    assert_eq!(result, Ok(12));
}

#[tokio::test]
async fn different_scope_waits_for_in_flight() {
    let scheduler = KernelScheduler::<&'static str, ()>::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let log_a = Arc::clone(&log);
    let a = scheduler.schedule("a", Some("t1".into()), move |name, _| {
        async move {
            log_a.lock().await.push(name);
            let _ = release_rx.await;
            log_a.lock().await.push("a-done");
        }
        .boxed()
    });
    let log_b = Arc::clone(&log);
    let b = scheduler.schedule("b", Some("t2".into()), move |name, _| {
        async move {
            log_b.lock().await.push(name);
        }
        .boxed()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*log.lock().await, vec!["a"]);
    assert_eq!(scheduler.pending(), 1);

    release_tx.send(()).unwrap();
    a.await.unwrap();
    b.await.unwrap();
    assert_eq!(*log.lock().await, vec!["a", "a-done", "b"]);
}

// --- Cancellation ---

#[tokio::test]
async fn cancel_rejects_in_flight_and_drains_after_executor_returns() {
    let scheduler = KernelScheduler::<(), &'static str>::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let log_a = Arc::clone(&log);
    let a = scheduler.schedule((), Some("t1".into()), move |_, cancel| {
        async move {
            cancel.cancelled().await;
            log_a.lock().await.push("a observed cancel");
            "a"
        }
        .boxed()
    });
    let log_b = Arc::clone(&log);
    let b = scheduler.schedule((), Some("t2".into()), move |_, _| {
        async move {
            log_b.lock().await.push("b ran");
            "b"
        }
        .boxed()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        scheduler.cancel_current_operation(),
        Some(Some("t1".to_owned()))
    );

    assert_eq!(a.await, Err(SchedulerError::Cancelled));
    assert_eq!(b.await, Ok("b"));
    assert_eq!(*log.lock().await, vec!["a observed cancel", "b ran"]);
}

#[tokio::test]
async fn cancel_when_idle_is_a_no_op() {
    let scheduler = KernelScheduler::<(), ()>::new();
    assert_eq!(scheduler.cancel_current_operation(), None);
    assert!(!scheduler.is_busy());
}
