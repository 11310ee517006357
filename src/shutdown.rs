use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

const SHUTDOWN_CHANNEL_CAPACITY: usize = 4;

#[derive(Default)]
struct ShutdownState {
    // 第一次订阅时才创建
    sender: Option<broadcast::Sender<()>>,
    triggered: bool,
}

/// 进程内的关闭广播，`serve` 循环和消费端的推送、轮询任务共享同一个信号
#[derive(Clone, Default)]
pub struct ShutdownManager {
    state: Arc<Mutex<ShutdownState>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅关闭信号；关闭之后订阅会得到一个已触发的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let mut state = self.state.lock().await;
        if state.triggered {
            return fired_receiver();
        }
        state
            .sender
            .get_or_insert_with(|| broadcast::channel(SHUTDOWN_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// 触发关闭，重复调用无效果
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.triggered {
            debug!("关闭信号已经发送过");
            return;
        }
        state.triggered = true;

        match state.sender.take() {
            Some(tx) => {
                let delivered = tx.send(()).unwrap_or(0);
                info!("关闭信号已发送给 {} 个订阅者", delivered);
            }
            None => info!("关闭信号已发送，当前没有订阅者"),
        }
    }

    pub async fn is_shutdown(&self) -> bool {
        self.state.lock().await.triggered
    }
}

fn fired_receiver() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);
    let _ = tx.send(());
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_reaches_every_subscriber() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown().await);

        let mut push_rx = manager.subscribe().await;
        let mut poll_rx = manager.subscribe().await;
        manager.shutdown().await;

        assert!(timeout(Duration::from_millis(100), push_rx.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(100), poll_rx.recv()).await.is_ok());
        assert!(manager.is_shutdown().await);
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fires_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown().await;

        let mut rx = manager.subscribe().await;
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_resubscribed_receiver_sees_signal() {
        let manager = ShutdownManager::new();
        let rx = manager.subscribe().await;
        let mut task_rx = rx.resubscribe();

        manager.shutdown().await;
        assert!(timeout(Duration::from_millis(100), task_rx.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let manager = ShutdownManager::new();
        let clone = manager.clone();

        manager.shutdown().await;
        clone.shutdown().await;
        assert!(clone.is_shutdown().await);
    }
}
