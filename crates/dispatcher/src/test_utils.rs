//! 测试用的Worker桩和客户端工厂

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use dataservice_core::{
    config::DispatcherConfig,
    models::*,
    traits::{WorkerClientFactory, WorkerService},
    DataServiceError, DataServiceResult,
};
use dataservice_infrastructure::RangeDatasetEngine;

use crate::service::Dispatcher;

/// 只记录收到的任务定义，不执行任何任务
pub struct RecordingWorker {
    address: String,
    tasks: Mutex<Vec<TaskDef>>,
}

impl RecordingWorker {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn received_tasks(&self) -> Vec<TaskDef> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl WorkerService for RecordingWorker {
    async fn process_task(&self, request: ProcessTaskRequest) -> DataServiceResult<ProcessTaskResponse> {
        self.tasks.lock().await.push(request.task);
        Ok(ProcessTaskResponse::default())
    }

    async fn get_element(&self, _request: GetElementRequest) -> DataServiceResult<GetElementResponse> {
        Ok(GetElementResponse::end_of_sequence())
    }

    async fn get_worker_tasks(
        &self,
        _request: GetWorkerTasksRequest,
    ) -> DataServiceResult<GetWorkerTasksResponse> {
        let tasks = self
            .tasks
            .lock()
            .await
            .iter()
            .map(|task| TaskInfo {
                worker_address: self.address.clone(),
                task_id: task.task_id,
                job_id: task.job_id,
                finished: false,
            })
            .collect();
        Ok(GetWorkerTasksResponse { tasks })
    }
}

/// 按地址缓存 [`RecordingWorker`]，可切换为连接失败
#[derive(Default)]
pub struct MockWorkerClientFactory {
    workers: Mutex<HashMap<String, Arc<RecordingWorker>>>,
    failing: AtomicBool,
    created: AtomicUsize,
}

impl MockWorkerClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 成功创建的客户端数量
    pub fn created_clients(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub async fn worker(&self, address: &str) -> Option<Arc<RecordingWorker>> {
        self.workers.lock().await.get(address).cloned()
    }

    pub async fn received_tasks(&self, address: &str) -> Vec<TaskDef> {
        match self.worker(address).await {
            Some(worker) => worker.received_tasks().await,
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl WorkerClientFactory for MockWorkerClientFactory {
    async fn create_worker_client(&self, address: &str) -> DataServiceResult<Arc<dyn WorkerService>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DataServiceError::Unavailable(format!(
                "failed to connect to worker {address}"
            )));
        }

        let mut workers = self.workers.lock().await;
        let worker = workers
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(RecordingWorker::new(address)));
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(worker) as Arc<dyn WorkerService>)
    }
}

pub fn dispatcher_config(work_dir: &str, fault_tolerant_mode: bool) -> DispatcherConfig {
    DispatcherConfig {
        work_dir: work_dir.to_string(),
        fault_tolerant_mode,
        job_gc_check_interval_ms: 50,
        job_gc_timeout_ms: 1000,
        ..Default::default()
    }
}

/// 创建使用range引擎和 [`MockWorkerClientFactory`] 的Dispatcher（未启动）
pub fn new_dispatcher(config: DispatcherConfig) -> (Arc<Dispatcher>, Arc<MockWorkerClientFactory>) {
    let factory = Arc::new(MockWorkerClientFactory::new());
    let dispatcher = Dispatcher::new(
        config,
        Arc::new(RangeDatasetEngine::new()),
        Arc::clone(&factory) as Arc<dyn WorkerClientFactory>,
    );
    (Arc::new(dispatcher), factory)
}
