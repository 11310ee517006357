//! Test helper utilities and common testing patterns

use confsync_core::{ChangeEvent, MessageStream};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// Useful where a background task (subscriber, poller) applies changes
    /// asynchronously.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = tokio::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        condition().await
    }
}

/// Next decodable change event on `stream`, or `None` on timeout or end of stream.
pub async fn next_event(stream: &mut MessageStream, timeout: Duration) -> Option<ChangeEvent> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let message = tokio::time::timeout_at(deadline, stream.next()).await.ok()??;
        if let Ok(event) = ChangeEvent::from_payload(&message.payload) {
            return Some(event);
        }
    }
}

/// Collects every event that arrives within `window`.
pub async fn drain_events(stream: &mut MessageStream, window: Duration) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, stream.next()).await {
        if let Ok(event) = ChangeEvent::from_payload(&message.payload) {
            events.push(event);
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_for_condition() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let ok = TestEnv::wait_for(
            move || {
                let counter = counter.clone();
                async move { counter.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        assert!(!TestEnv::wait_for(|| async { false }, Duration::from_millis(50)).await);
    }
}
