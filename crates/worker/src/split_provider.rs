use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use dataservice_core::{
    models::{GetSplitRequest, Split},
    traits::{DispatcherService, SplitProvider},
    DataServiceError, DataServiceResult,
};

/// 给一次Dispatcher调用加上超时，超时视为 `Unavailable`
pub(crate) async fn call_with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = DataServiceResult<T>>,
) -> DataServiceResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(DataServiceError::Unavailable(format!(
            "dispatcher did not respond within {timeout:?}"
        ))),
    }
}

/// 从Dispatcher拉取切片的切片来源，用于分布式epoch任务
///
/// `reset` 进入下一个repetition，Dispatcher为每个repetition维护独立的切片序列。
pub struct DispatcherSplitProvider {
    dispatcher: Arc<dyn DispatcherService>,
    job_id: i64,
    repetition: i64,
    timeout: Duration,
}

impl DispatcherSplitProvider {
    pub fn new(dispatcher: Arc<dyn DispatcherService>, job_id: i64, timeout: Duration) -> Self {
        Self {
            dispatcher,
            job_id,
            repetition: 0,
            timeout,
        }
    }

    pub fn repetition(&self) -> i64 {
        self.repetition
    }
}

#[async_trait]
impl SplitProvider for DispatcherSplitProvider {
    async fn get_next(&mut self) -> DataServiceResult<Option<Split>> {
        let response = call_with_timeout(
            self.timeout,
            self.dispatcher.get_split(GetSplitRequest {
                job_id: self.job_id,
                repetition: self.repetition,
            }),
        )
        .await?;

        if response.end_of_splits {
            debug!(
                "Reached end of splits for job {} repetition {}",
                self.job_id, self.repetition
            );
            return Ok(None);
        }
        Ok(response.split)
    }

    async fn reset(&mut self) -> DataServiceResult<()> {
        self.repetition += 1;
        Ok(())
    }
}
