//! Integration tests for the worker pool.

use core_async::{CancellationToken, WorkerPool, WorkerPoolConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn pool<T: Send + 'static>(min: usize, max: usize, queue: usize) -> WorkerPool<T> {
    WorkerPool::new(
        WorkerPoolConfig::new(min, max)
            .with_queue_capacity(queue)
            .with_idle_timeout(Duration::from_millis(50)),
        CancellationToken::new(),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_max_workers() {
    let pool = pool::<usize>(1, 3, 1);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for i in 0..20 {
        let running = running.clone();
        let peak = peak.clone();
        pool.submit(move || async move {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            Ok(i)
        })
        .await;
    }

    let results = pool.wait().await;
    assert_eq!(results.len(), 20);
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded max", peak);
    assert!(peak >= 2, "pool never scaled beyond its core worker");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_task_runs_exactly_once() {
    let pool = pool::<usize>(2, 4, 8);
    let executions = Arc::new(AtomicUsize::new(0));

    for i in 0..50 {
        let executions = executions.clone();
        pool.submit(move || async move {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok(i)
        })
        .await;
    }

    let results = pool.wait().await;
    assert_eq!(results.len(), 50);
    assert_eq!(executions.load(Ordering::SeqCst), 50);

    let mut values: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
    values.sort_unstable();
    assert_eq!(values, (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_task_is_contained() {
    let pool = pool::<&'static str>(1, 2, 4);

    pool.submit(|| async { Ok("first") }).await;
    pool.submit(|| async {
        if true {
            panic!("lookup exploded");
        }
        Ok("unreachable")
    })
    .await;
    pool.submit(|| async { Err(anyhow::anyhow!("remote said no")) })
        .await;
    pool.submit(|| async { Ok("last") }).await;

    let results = pool.wait().await;
    assert_eq!(results.len(), 4);

    let panics: Vec<_> = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .filter(|e| e.is_panic())
        .collect();
    assert_eq!(panics.len(), 1);
    assert!(panics[0].to_string().contains("lookup exploded"));

    let mut successes: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    successes.sort();
    assert_eq!(successes, vec![&"first", &"last"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_after_cancel_is_dropped() {
    let pool = pool::<u32>(1, 2, 4);
    pool.submit(|| async { Ok(1) }).await;
    pool.cancel();
    pool.submit(|| async { Ok(2) }).await;

    assert_eq!(pool.accepted(), 1);
    let results = pool.wait().await;
    assert_eq!(results.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_drains_queued_tasks() {
    let pool = pool::<u32>(1, 1, 10);
    let gate = Arc::new(Notify::new());

    let blocker = gate.clone();
    pool.submit(move || async move {
        blocker.notified().await;
        Ok(0)
    })
    .await;
    for i in 1..=3 {
        pool.submit(move || async move { Ok(i) }).await;
    }

    pool.cancel();
    gate.notify_one();

    let mut values: Vec<u32> = pool.wait().await.into_iter().map(|r| r.unwrap()).collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parent_cancellation_reaches_pool() {
    let parent = CancellationToken::new();
    let pool: WorkerPool<()> =
        WorkerPool::new(WorkerPoolConfig::new(1, 2), parent.clone()).unwrap();

    parent.cancel();
    assert!(pool.is_cancelled());
    pool.submit(|| async { Ok(()) }).await;
    assert_eq!(pool.accepted(), 0);
    assert!(pool.wait().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_workers_retire_when_idle() {
    let pool = pool::<()>(1, 4, 1);

    for _ in 0..8 {
        pool.submit(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
        .await;
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.live_workers(), 1);
    assert_eq!(pool.wait().await.len(), 8);
}

#[tokio::test]
async fn test_zero_min_workers_keeps_one_core_worker() {
    let pool = pool::<u8>(0, 2, 4);
    assert_eq!(pool.live_workers(), 1);

    pool.submit(|| async { Ok(9) }).await;
    let results = pool.wait().await;
    assert_eq!(results.len(), 1);
    assert_eq!(*results[0].as_ref().unwrap(), 9);
}
