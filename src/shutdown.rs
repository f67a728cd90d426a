use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

/// 进程级关闭信号
///
/// HTTP服务、作业回收循环和Worker后台循环都订阅同一个广播通道，
/// 触发后发送端被丢弃，之后的订阅者会立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
        }
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        match self.shutdown_tx.lock().await.as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                let _ = tx.send(());
                rx
            }
        }
    }

    /// 向所有订阅者发送关闭信号，重复调用无副作用
    pub async fn shutdown(&self) {
        let Some(tx) = self.shutdown_tx.lock().await.take() else {
            debug!("Shutdown already triggered");
            return;
        };

        debug!("Sending shutdown signal to {} subscribers", tx.receiver_count());
        // 没有订阅者时发送失败，忽略
        let _ = tx.send(());
        info!("关闭信号已发送");
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown_tx.lock().await.is_none()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
