use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::service::Dispatcher;

/// 周期性回收空闲超时的作业
pub struct JobGarbageCollector {
    dispatcher: Arc<Dispatcher>,
    check_interval: Duration,
}

impl JobGarbageCollector {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let check_interval = Duration::from_millis(dispatcher.config().job_gc_check_interval_ms);
        Self {
            dispatcher,
            check_interval,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        info!(
            "Starting job garbage collector, check interval {:?}",
            self.check_interval
        );

        tokio::spawn(async move {
            let mut check_interval = interval(self.check_interval);
            // 第一次tick立即返回，跳过
            check_interval.tick().await;

            loop {
                tokio::select! {
                    _ = check_interval.tick() => {
                        match self.dispatcher.gc_old_jobs(Utc::now().timestamp_micros()).await {
                            Ok(0) => debug!("No jobs eligible for garbage collection"),
                            Ok(count) => info!("Garbage collected {} jobs", count),
                            Err(e) => error!("Job garbage collection failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Job garbage collector shutting down");
                        break;
                    }
                }
            }
        })
    }
}
