use super::*;

#[tokio::test]
async fn test_start_batch_rejects_invalid_request() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        fake_downloader(temp_dir.path(), &[]),
        fake_transcoder(temp_dir.path(), None),
    );

    let err = orchestrator
        .start_batch(BatchRequest::new("", temp_dir.path()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "missing_url");

    let mut request = download_request(temp_dir.path());
    request.convert = true;
    let err = orchestrator.start_batch(request).await.unwrap_err();
    assert_eq!(err.code(), "missing_target_format");

    assert_eq!(orchestrator.state(), BatchState::Idle);
    assert_eq!(orchestrator.live_processes(), 0);
}

#[tokio::test]
async fn test_start_batch_while_running_is_already_running() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        slow_tool(temp_dir.path(), "slow-yt-dlp"),
        fake_transcoder(temp_dir.path(), None),
    );

    let batch = orchestrator
        .start_batch(download_request(temp_dir.path()))
        .await
        .unwrap();
    let err = orchestrator
        .start_batch(download_request(temp_dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning));

    orchestrator.cancel_batch(&batch).await.unwrap();
    assert_eq!(batch.outcome().await, BatchOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_download_empties_registry() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        slow_tool(temp_dir.path(), "slow-yt-dlp"),
        fake_transcoder(temp_dir.path(), None),
    );
    let mut events = orchestrator.subscribe();

    let batch = orchestrator
        .start_batch(convert_request(temp_dir.path()))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || orchestrator.live_processes() == 1).await);
    assert_eq!(orchestrator.state(), BatchState::Downloading);

    orchestrator.cancel_batch(&batch).await.unwrap();
    assert_eq!(orchestrator.state(), BatchState::Cancelled);

    let outcome = tokio::time::timeout(Duration::from_secs(5), batch.outcome())
        .await
        .expect("batch did not wind down after cancel");
    assert_eq!(outcome, BatchOutcome::Cancelled);
    assert_eq!(orchestrator.live_processes(), 0);
    assert_eq!(orchestrator.state(), BatchState::Idle);

    let events = drain_events(&mut events);
    assert_eq!(
        state_changes(&events, batch.id()),
        vec![BatchState::Downloading, BatchState::Cancelled, BatchState::Idle]
    );
    assert_eq!(count_finished(&events), 1);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, Event::JobStarted { .. }))
    );
}

#[tokio::test]
async fn test_cancel_during_conversion_kills_in_flight_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        fake_downloader(temp_dir.path(), &["a.mp4", "b.mp4", "c.mkv", "d.webm"]),
        slow_tool(temp_dir.path(), "slow-ffmpeg"),
    );
    let mut events = orchestrator.subscribe();

    let batch = orchestrator
        .start_batch(convert_request(temp_dir.path()))
        .await
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            orchestrator.state() == BatchState::Converting && orchestrator.live_processes() == 2
        })
        .await
    );

    orchestrator.cancel_batch(&batch).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), batch.outcome())
        .await
        .expect("batch did not wind down after cancel");
    assert_eq!(outcome, BatchOutcome::Cancelled);
    assert_eq!(orchestrator.live_processes(), 0);

    let events = drain_events(&mut events);
    let started = events
        .iter()
        .filter(|e| matches!(e, Event::JobStarted { .. }))
        .count();
    assert_eq!(started, 2, "queued jobs must not start after cancel");
    assert!(events.iter().all(|e| match e {
        Event::JobFinished { state, .. } => *state == ProcessState::Killed,
        _ => true,
    }));
    assert!(
        orchestrator_lines(&events)
            .iter()
            .any(|l| l == "Process stopped.")
    );
}

#[tokio::test]
async fn test_cancel_after_finish_is_not_running() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        fake_downloader(temp_dir.path(), &[]),
        fake_transcoder(temp_dir.path(), None),
    );

    let batch = orchestrator
        .start_batch(download_request(temp_dir.path()))
        .await
        .unwrap();
    batch.outcome().await;

    let err = orchestrator.cancel_batch(&batch).await.unwrap_err();
    assert!(matches!(
        err,
        Error::NotRunning {
            state: BatchState::Idle
        }
    ));
}

#[tokio::test]
async fn test_cancel_twice_reports_not_running() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        slow_tool(temp_dir.path(), "slow-yt-dlp"),
        fake_transcoder(temp_dir.path(), None),
    );

    let batch = orchestrator
        .start_batch(download_request(temp_dir.path()))
        .await
        .unwrap();
    orchestrator.cancel_batch(&batch).await.unwrap();

    // Either still winding down (Cancelled) or already back to Idle
    let err = orchestrator.cancel_batch(&batch).await.unwrap_err();
    assert_eq!(err.code(), "not_running");
    assert_eq!(batch.outcome().await, BatchOutcome::Cancelled);
}
