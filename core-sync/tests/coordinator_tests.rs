//! Integration tests for job bookkeeping around the pipeline.

mod common;

use common::*;
use core_runtime::events::{CoreEvent, SyncEvent};
use core_sync::{SyncCoordinator, SyncError, SyncMode};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

fn sync_events(receiver: &mut Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let CoreEvent::Sync(event) = event {
            events.push(event);
        }
    }
    events
}

fn terminal_events(events: &[SyncEvent]) -> Vec<&SyncEvent> {
    events.iter().filter(|event| event.is_done()).collect()
}

#[tokio::test]
async fn test_successful_job_emits_started_then_completed() {
    let server = FakeMediaServer::new(catalog(30, 1, 3));
    let harness = Harness::new(server, small_batches()).await;
    let coordinator = SyncCoordinator::new(harness.pipeline.clone(), harness.events.clone(), None);
    let mut receiver = harness.events.subscribe();

    let summary = coordinator.full_sync().await.unwrap();

    let events = sync_events(&mut receiver);
    match events.first() {
        Some(SyncEvent::Started { job_id, mode }) => {
            assert_eq!(job_id, &summary.job_id.to_string());
            assert_eq!(mode, "full");
        }
        other => panic!("expected Started first, got {other:?}"),
    }

    let terminal = terminal_events(&events);
    assert_eq!(terminal.len(), 1);
    match terminal[0] {
        SyncEvent::Completed {
            total_items,
            total_seasons,
            is_incremental,
            ..
        } => {
            assert_eq!(*total_items, 34);
            assert_eq!(*total_seasons, 1);
            assert!(!is_incremental);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn test_failed_job_emits_failed_with_phase() {
    let server = FakeMediaServer::new(catalog(250, 0, 0));
    server.fail_on_page(1);
    let harness = Harness::new(server, small_batches()).await;
    let coordinator = SyncCoordinator::new(harness.pipeline.clone(), harness.events.clone(), None);
    let mut receiver = harness.events.subscribe();

    let error = coordinator.full_sync().await.unwrap_err();
    assert!(matches!(error, SyncError::Remote(_)));

    let events = sync_events(&mut receiver);
    let terminal = terminal_events(&events);
    assert_eq!(terminal.len(), 1);
    match terminal[0] {
        SyncEvent::Failed {
            message,
            recoverable,
            ..
        } => {
            assert!(message.contains("502"));
            assert!(recoverable);
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!coordinator.is_running());
}

#[tokio::test]
async fn test_purge_completion_reports_deleted_items() {
    let server = FakeMediaServer::new(catalog(20, 0, 0));
    let harness = Harness::new(server.clone(), small_batches()).await;
    let coordinator = SyncCoordinator::new(harness.pipeline.clone(), harness.events.clone(), None);
    coordinator.full_sync().await.unwrap();

    server.set_catalog(catalog(12, 0, 0));
    let mut receiver = harness.events.subscribe();
    let summary = coordinator.purge_deleted().await.unwrap();
    assert_eq!(summary.deleted, 8);

    let events = sync_events(&mut receiver);
    match terminal_events(&events)[0] {
        SyncEvent::Completed {
            total_items,
            deleted_items,
            ..
        } => {
            assert_eq!(*total_items, 12);
            assert_eq!(*deleted_items, 8);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_second_job_is_rejected_while_one_runs() {
    let server = FakeMediaServer::new(catalog(10, 0, 0));
    server.delay_pages(Duration::from_millis(300));
    let harness = Harness::new(server, small_batches()).await;
    let coordinator = SyncCoordinator::new(harness.pipeline.clone(), harness.events.clone(), None);

    let job_id = coordinator.start(SyncMode::Full).unwrap();
    assert!(coordinator.is_running());
    assert_eq!(coordinator.active_job(), Some((job_id, SyncMode::Full)));

    let error = coordinator.incremental_sync().await.unwrap_err();
    match error {
        SyncError::SyncInProgress { job_id: running } => assert_eq!(running, job_id.to_string()),
        other => panic!("expected SyncInProgress, got {other:?}"),
    }
    assert!(matches!(
        coordinator.start(SyncMode::Purge),
        Err(SyncError::SyncInProgress { .. })
    ));

    while coordinator.is_running() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.store.media_items().count().await.unwrap(), 10);

    // The slot is free again.
    coordinator.incremental_sync().await.unwrap();
}

#[tokio::test]
async fn test_cancel_stops_running_job() {
    let server = FakeMediaServer::new(catalog(10, 0, 0));
    server.delay_pages(Duration::from_secs(30));
    let harness = Harness::new(server, small_batches()).await;
    let coordinator = SyncCoordinator::new(harness.pipeline.clone(), harness.events.clone(), None);
    let mut receiver = harness.events.subscribe();

    assert!(!coordinator.cancel());
    coordinator.start(SyncMode::Full).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(coordinator.cancel());

    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cancelled job should release the slot promptly");

    let events = sync_events(&mut receiver);
    let terminal = terminal_events(&events);
    assert_eq!(terminal.len(), 1);
    match terminal[0] {
        SyncEvent::Cancelled { phase, timed_out, .. } => {
            assert_eq!(phase, "fetching");
            assert!(!timed_out);
        }
        other => panic!("expected Cancelled, got {other:?}"),
    }
}

#[tokio::test]
async fn test_deadline_turns_cancellation_into_timeout() {
    let server = FakeMediaServer::new(catalog(10, 0, 0));
    server.delay_pages(Duration::from_secs(30));
    let harness = Harness::new(server, small_batches()).await;
    let coordinator = SyncCoordinator::new(
        harness.pipeline.clone(),
        harness.events.clone(),
        Some(Duration::from_millis(100)),
    );
    let mut receiver = harness.events.subscribe();

    let error = tokio::time::timeout(Duration::from_secs(5), coordinator.full_sync())
        .await
        .expect("deadline should stop the job")
        .unwrap_err();

    assert!(matches!(error, SyncError::Timeout(_)));
    assert!(error.is_cancellation());

    let events = sync_events(&mut receiver);
    match terminal_events(&events).as_slice() {
        [SyncEvent::Cancelled { timed_out, .. }] => assert!(*timed_out),
        other => panic!("expected one Cancelled event, got {other:?}"),
    }
    assert!(harness.store.sync_state().last_synced_at().await.unwrap().is_none());
}

#[tokio::test]
async fn test_incremental_fallback_is_reported_as_full() {
    let server = FakeMediaServer::new(catalog(5, 0, 0));
    let harness = Harness::new(server, small_batches()).await;
    let coordinator = SyncCoordinator::new(harness.pipeline.clone(), harness.events.clone(), None);

    let summary = coordinator.incremental_sync().await.unwrap();

    assert!(!summary.is_incremental);
    assert_eq!(summary.total_items, 5);
}
