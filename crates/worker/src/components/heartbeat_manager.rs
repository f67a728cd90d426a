use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use crate::service::Worker;

pub struct HeartbeatManager {
    worker: Arc<Worker>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(worker: Arc<Worker>, heartbeat_interval: Duration) -> Self {
        Self {
            worker,
            heartbeat_interval,
        }
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut heartbeat_interval = interval(self.heartbeat_interval);
            // 注册时刚发过一次心跳
            heartbeat_interval.tick().await;

            loop {
                tokio::select! {
                    _ = heartbeat_interval.tick() => {
                        if let Err(e) = self.worker.heartbeat().await {
                            error!("Failed to send heartbeat to dispatcher: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Heartbeat task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
