use super::*;

#[tokio::test]
async fn test_shutdown_when_idle_rejects_new_batches() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        fake_downloader(temp_dir.path(), &[]),
        fake_transcoder(temp_dir.path(), None),
    );
    let mut events = orchestrator.subscribe();

    orchestrator.shutdown().await.unwrap();
    assert!(!orchestrator.is_accepting());

    let err = orchestrator
        .start_batch(download_request(temp_dir.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));

    let events = drain_events(&mut events);
    assert!(matches!(events.as_slice(), [Event::Shutdown]));
}

#[tokio::test]
async fn test_shutdown_kills_active_batch() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        fake_downloader(temp_dir.path(), &["a.mp4", "b.mp4", "c.mp4"]),
        slow_tool(temp_dir.path(), "slow-ffmpeg"),
    );
    let mut events = orchestrator.subscribe();

    let batch = orchestrator
        .start_batch(convert_request(temp_dir.path()))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || orchestrator.live_processes() == 2).await);

    tokio::time::timeout(Duration::from_secs(10), orchestrator.shutdown())
        .await
        .expect("shutdown did not finish")
        .unwrap();

    // Everything is reaped and reported before shutdown returns
    assert_eq!(batch.try_outcome(), Some(BatchOutcome::Cancelled));
    assert_eq!(orchestrator.live_processes(), 0);
    assert_eq!(orchestrator.state(), BatchState::Idle);

    let events = drain_events(&mut events);
    assert!(matches!(events.last(), Some(Event::Shutdown)));
    assert_eq!(count_finished(&events), 1);
}

#[tokio::test]
async fn test_shutdown_while_downloading_cancels_batch() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = create_test_orchestrator(
        slow_tool(temp_dir.path(), "slow-yt-dlp"),
        fake_transcoder(temp_dir.path(), None),
    );

    let batch = orchestrator
        .start_batch(download_request(temp_dir.path()))
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(5), || orchestrator.live_processes() == 1).await);

    let other = orchestrator.clone();
    let shutdown = tokio::spawn(async move { other.shutdown().await });

    assert_eq!(batch.outcome().await, BatchOutcome::Cancelled);
    shutdown.await.unwrap().unwrap();
    assert!(!orchestrator.is_accepting());
}
