use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use dataservice_core::{
    models::{DatasetDef, DatasetSource, Element, GetDatasetDefRequest, ProcessingMode, TaskDef},
    traits::{DatasetEngine, DatasetIterator, DispatcherService, SplitProvider},
    DataServiceResult,
};
use dataservice_infrastructure::read_dataset_def;

use crate::split_provider::{call_with_timeout, DispatcherSplitProvider};

enum TaskRuntime {
    Created,
    Initialized(Box<dyn DatasetIterator>),
    Finished,
}

/// 一次 `next` 调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum NextElement {
    Element(Element),
    /// 本次调用让任务进入完成状态
    Finished,
    AlreadyFinished,
}

/// Worker上的单个任务
///
/// 迭代器在第一次取元素时构建，初始化由任务自己的锁保护，不会阻塞其他任务。
/// 初始化失败时任务保持未初始化，下一次请求会重试。
pub struct TaskRunner {
    task_def: TaskDef,
    engine: Arc<dyn DatasetEngine>,
    dispatcher: Arc<dyn DispatcherService>,
    dispatcher_timeout: Duration,
    runtime: Mutex<TaskRuntime>,
}

impl TaskRunner {
    pub fn new(
        task_def: TaskDef,
        engine: Arc<dyn DatasetEngine>,
        dispatcher: Arc<dyn DispatcherService>,
        dispatcher_timeout: Duration,
    ) -> Self {
        Self {
            task_def,
            engine,
            dispatcher,
            dispatcher_timeout,
            runtime: Mutex::new(TaskRuntime::Created),
        }
    }

    pub fn task_def(&self) -> &TaskDef {
        &self.task_def
    }

    pub async fn is_finished(&self) -> bool {
        matches!(*self.runtime.lock().await, TaskRuntime::Finished)
    }

    pub async fn next(&self) -> DataServiceResult<NextElement> {
        let mut runtime = self.runtime.lock().await;
        if matches!(*runtime, TaskRuntime::Created) {
            *runtime = TaskRuntime::Initialized(self.make_iterator().await?);
            info!(
                "Initialized iterator for task {} of job {}",
                self.task_def.task_id, self.task_def.job_id
            );
        }

        let iterator = match &mut *runtime {
            TaskRuntime::Initialized(iterator) => iterator,
            _ => return Ok(NextElement::AlreadyFinished),
        };
        match iterator.get_next().await? {
            Some(element) => Ok(NextElement::Element(element)),
            None => {
                *runtime = TaskRuntime::Finished;
                Ok(NextElement::Finished)
            }
        }
    }

    async fn make_iterator(&self) -> DataServiceResult<Box<dyn DatasetIterator>> {
        let dataset = self.resolve_dataset().await?;
        let split_provider: Option<Box<dyn SplitProvider>> = match self.task_def.processing_mode {
            ProcessingMode::ParallelEpochs => None,
            ProcessingMode::DistributedEpoch => Some(Box::new(DispatcherSplitProvider::new(
                Arc::clone(&self.dispatcher),
                self.task_def.job_id,
                self.dispatcher_timeout,
            ))),
        };
        self.engine.make_iterator(&dataset, split_provider)
    }

    async fn resolve_dataset(&self) -> DataServiceResult<DatasetDef> {
        let path = match &self.task_def.dataset {
            DatasetSource::Inline(dataset) => return Ok(dataset.clone()),
            DatasetSource::Path(path) => path,
        };

        match read_dataset_def(path).await {
            Ok(dataset) => Ok(dataset),
            Err(e) => {
                warn!(
                    "Failed to read dataset from {}: {}. Falling back to reading from dispatcher",
                    path, e
                );
                let response = call_with_timeout(
                    self.dispatcher_timeout,
                    self.dispatcher.get_dataset_def(GetDatasetDefRequest {
                        dataset_id: self.task_def.dataset_id,
                    }),
                )
                .await?;
                Ok(response.dataset_def)
            }
        }
    }
}
