use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::service::Worker;

/// 把本地完成的任务批量上报给Dispatcher
///
/// 每次被唤醒时发送一个 `WorkerUpdate`，失败后间隔 `retry_interval` 重试，直到成功或收到关闭信号。
pub struct TaskCompletionReporter {
    worker: Arc<Worker>,
    retry_interval: Duration,
}

impl TaskCompletionReporter {
    pub fn new(worker: Arc<Worker>, retry_interval: Duration) -> Self {
        Self {
            worker,
            retry_interval,
        }
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.worker.task_completed().notified() => {}
                    _ = shutdown_rx.recv() => {
                        info!("Task completion reporter shutting down");
                        return;
                    }
                }

                loop {
                    match self.worker.send_task_updates().await {
                        Ok(_) => break,
                        Err(e) => {
                            warn!(
                                "Failed to send task updates to dispatcher: {}. Will retry in {:?}",
                                e, self.retry_interval
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(self.retry_interval) => {}
                                _ = shutdown_rx.recv() => {
                                    info!("Task completion reporter shutting down");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}
