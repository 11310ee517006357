use confsync_core::{SyncError, SyncResult};
use std::future::Future;
use std::time::Duration;

/// Runs one cache-medium call under `limit`. Expiry becomes
/// [`SyncError::Timeout`]; the call is not retried.
pub(crate) async fn bounded<T, F>(limit: Duration, operation: &str, fut: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout(format!(
            "{} exceeded {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result: SyncResult<()> = bounded(Duration::from_millis(50), "SET k", async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(SyncError::Timeout(ref m)) if m.contains("SET k")));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: SyncResult<()> = bounded(Duration::from_secs(1), "DEL k", async {
            Err(SyncError::cache("refused"))
        })
        .await;
        assert!(matches!(result, Err(SyncError::CacheWrite(_))));
    }
}
