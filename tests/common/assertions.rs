//! Custom test assertions for integration tests

use std::time::Duration;
use tokio::sync::broadcast;
use vd_master::{BatchId, BatchOutcome, Event};

/// Collect every event up to and including `BatchFinished` for `batch`
///
/// Panics if the batch does not finish within `timeout`.
pub async fn collect_until_finished(
    events: &mut broadcast::Receiver<Event>,
    batch: BatchId,
    timeout: Duration,
) -> (Vec<Event>, BatchOutcome) {
    let mut collected = Vec::new();
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::BatchFinished {
                    batch: finished,
                    outcome,
                }) if finished == batch => {
                    collected.push(Event::BatchFinished {
                        batch: finished,
                        outcome: outcome.clone(),
                    });
                    return outcome;
                }
                Ok(event) => collected.push(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    panic!("Event subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("Event channel closed before batch {} finished", batch);
                }
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => (collected, outcome),
        Err(_) => panic!("Batch {} did not finish within {:?}", batch, timeout),
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Text of every log line in `events`, in order
pub fn log_texts(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Log { line, .. } => Some(line.text.clone()),
            _ => None,
        })
        .collect()
}
