//! Reporting facade tests: progress snapshots, outcome pages across
//! storage buckets, error reports, the topology access check, and drop
//! requests flowing through to the kill flag.

mod common;

use common::{
    commit_synthetic_outcome, streaming_task, test_stores, test_tracker,
    uncached_cancellation_config,
};
use curator_core::cancellation::CancellationProbe;
use curator_core::error::CuratorError;
use curator_core::models::{OutcomeEvent, TaskState};
use curator_core::reports::ReportService;
use uuid::Uuid;

#[tokio::test]
async fn progress_snapshot_reflects_a_task_mid_stream() {
    let (store, handles) = test_stores();
    let tracker = test_tracker(store.clone());
    let service = ReportService::new(handles, tracker.clone());
    tracker.register_task(streaming_task(7, 10)).await.unwrap();

    tracker
        .handle_event(OutcomeEvent::success(7, "rec-1"))
        .await
        .unwrap();
    tracker
        .handle_event(OutcomeEvent::failure(7, "rec-2", "invalid xml"))
        .await
        .unwrap();
    tracker
        .handle_event(OutcomeEvent::success(7, "rec-3"))
        .await
        .unwrap();

    let progress = service.task_progress("harvest", 7).await.unwrap();
    assert_eq!(progress.state, TaskState::Queued);
    assert_eq!(progress.counter_total(), 3);
    assert_eq!(progress.processed_errors_count, 1);
    assert_eq!(progress.expected_records_count, Some(10));
    assert!(progress.finished_at.is_none());
}

#[tokio::test]
async fn topology_mismatch_and_unknown_task_read_the_same() {
    let (store, handles) = test_stores();
    let tracker = test_tracker(store.clone());
    let service = ReportService::new(handles, tracker.clone());
    tracker.register_task(streaming_task(7, 10)).await.unwrap();

    let mismatch = service.task_progress("depublication", 7).await;
    assert!(matches!(
        mismatch,
        Err(CuratorError::TaskAccess { task_id: 7, .. })
    ));

    // A task that does not exist yields the same error, so callers cannot
    // probe for foreign task ids.
    let missing = service.task_progress("harvest", 404).await;
    assert!(matches!(
        missing,
        Err(CuratorError::TaskAccess { task_id: 404, .. })
    ));
}

#[tokio::test]
async fn outcome_page_is_ordered_and_bounded() {
    let (store, handles) = test_stores();
    let tracker = test_tracker(store.clone());
    let service = ReportService::new(handles, tracker.clone());
    tracker.register_task(streaming_task(7, 6)).await.unwrap();
    for num in 1..=6 {
        tracker
            .handle_event(OutcomeEvent::success(7, format!("rec-{num}")))
            .await
            .unwrap();
    }

    let page = service.outcome_page("harvest", 7, 2, 4).await.unwrap();
    let numbering: Vec<i64> = page.iter().map(|o| o.resource_num).collect();
    assert_eq!(numbering, vec![2, 3, 4]);
}

#[tokio::test]
async fn outcome_page_reassembles_across_buckets() {
    let (store, handles) = test_stores();
    let tracker = test_tracker(store.clone());
    let service = ReportService::new(handles, tracker.clone());
    let mut submission = streaming_task(7, 0);
    submission.expected_records_count = None;
    tracker.register_task(submission).await.unwrap();

    for resource_num in [9_999, 10_000, 10_001] {
        commit_synthetic_outcome(&store, 7, resource_num).await;
    }

    let page = service
        .outcome_page("harvest", 7, 9_999, 10_001)
        .await
        .unwrap();
    let layout: Vec<(i32, i64)> = page.iter().map(|o| (o.bucket, o.resource_num)).collect();
    assert_eq!(layout, vec![(0, 9_999), (1, 10_000), (1, 10_001)]);
}

#[tokio::test]
async fn error_reports_aggregate_by_kind() {
    let (store, handles) = test_stores();
    let tracker = test_tracker(store.clone());
    let service = ReportService::new(handles, tracker.clone());
    tracker.register_task(streaming_task(7, 5)).await.unwrap();

    for num in 1..=3 {
        tracker
            .handle_event(OutcomeEvent::failure(7, format!("rec-{num}"), "invalid xml"))
            .await
            .unwrap();
    }
    for num in 4..=5 {
        tracker
            .handle_event(OutcomeEvent::failure(7, format!("rec-{num}"), "timeout"))
            .await
            .unwrap();
    }

    let reports = service.general_error_report("harvest", 7, 2).await.unwrap();
    assert_eq!(reports.len(), 2);
    let xml = reports.iter().find(|r| r.message == "invalid xml").unwrap();
    assert_eq!(xml.occurrences, 3);
    assert_eq!(xml.samples.len(), 2);
    assert_eq!(xml.samples[0].record_id, "rec-1");
    let timeout = reports.iter().find(|r| r.message == "timeout").unwrap();
    assert_eq!(timeout.occurrences, 2);

    // A zero limit asks for the counts alone.
    let bare = service.general_error_report("harvest", 7, 0).await.unwrap();
    assert!(bare.iter().all(|r| r.samples.is_empty()));
    assert_eq!(bare.iter().map(|r| r.occurrences).sum::<i64>(), 5);

    let by_id = service
        .specific_error_report("harvest", 7, xml.error_id, 1)
        .await
        .unwrap();
    assert_eq!(by_id.message, "invalid xml");
    assert_eq!(by_id.occurrences, 3);
    assert_eq!(by_id.samples.len(), 1);

    let unknown = service
        .specific_error_report("harvest", 7, Uuid::new_v4(), 1)
        .await;
    assert!(matches!(
        unknown,
        Err(CuratorError::UnknownErrorType { task_id: 7, .. })
    ));
}

#[tokio::test]
async fn drop_request_reaches_the_kill_flag() {
    let (store, handles) = test_stores();
    let tracker = test_tracker(store.clone());
    let service = ReportService::new(handles, tracker.clone());
    tracker.register_task(streaming_task(7, 10)).await.unwrap();

    // The drop is also subject to the topology check.
    assert!(service
        .drop_task("depublication", 7, "Dropped by operator")
        .await
        .is_err());

    service
        .drop_task("harvest", 7, "Dropped by operator")
        .await
        .unwrap();
    let progress = service.task_progress("harvest", 7).await.unwrap();
    assert_eq!(progress.state, TaskState::Dropped);
    assert_eq!(progress.info, "Dropped by operator");

    let probe = CancellationProbe::new(store, &uncached_cancellation_config());
    assert!(probe.has_dropped_status(7).await.unwrap());
}
