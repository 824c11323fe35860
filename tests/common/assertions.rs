//! Custom test assertions for integration tests

use clipfetch::{ArtifactBundle, Event, RunId};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

/// Result of waiting for a run to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Run completed with a bundle
    Completed(Box<ArtifactBundle>),
    /// Run failed with error
    Failed(String),
    /// Timeout waiting for completion
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a run to reach a terminal state (Completed or Failed)
///
/// `events` must have been subscribed before the run was submitted, or the
/// terminal event may already have gone by.
pub async fn wait_for_completion(
    events: &mut Receiver<Event>,
    id: RunId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed {
                    id: event_id,
                    bundle,
                }) if event_id == id => {
                    return WaitResult::Completed(Box::new(bundle));
                }
                Ok(Event::Failed {
                    id: event_id,
                    error,
                }) if event_id == id => {
                    return WaitResult::Failed(error);
                }
                Ok(_) => {
                    // Other events, continue waiting
                    continue;
                }
                Err(_) => {
                    return WaitResult::ChannelClosed;
                }
            }
        }
    })
    .await;

    match result {
        Ok(wait_result) => wait_result,
        Err(_) => WaitResult::Timeout,
    }
}

/// Drain buffered events without waiting
pub fn drain(events: &mut Receiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
