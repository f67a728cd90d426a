use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dataservice_core::{
    config::WorkerConfig,
    models::*,
    traits::{DatasetEngine, DispatcherService, WorkerService},
    DataServiceError, DataServiceResult,
};

use crate::components::{HeartbeatManager, TaskCompletionReporter};
use crate::split_provider::call_with_timeout;
use crate::task_runner::{NextElement, TaskRunner};

#[derive(Default)]
struct WorkerState {
    worker_address: String,
    tasks: HashMap<i64, Arc<TaskRunner>>,
    /// 本地已完成、尚未成功上报给Dispatcher的任务
    pending_completed_tasks: BTreeSet<i64>,
    registered: bool,
}

/// 数据服务Worker
pub struct Worker {
    config: WorkerConfig,
    engine: Arc<dyn DatasetEngine>,
    dispatcher: Arc<dyn DispatcherService>,
    state: Mutex<WorkerState>,
    task_completed: Notify,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        engine: Arc<dyn DatasetEngine>,
        dispatcher: Arc<dyn DispatcherService>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            engine,
            dispatcher,
            state: Mutex::new(WorkerState::default()),
            task_completed: Notify::new(),
            shutdown_tx,
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn dispatcher_timeout(&self) -> Duration {
        Duration::from_millis(self.config.dispatcher_timeout_ms)
    }

    /// 向Dispatcher注册（Dispatcher不可用时持续重试），然后启动心跳和完成上报循环
    pub async fn start(self: &Arc<Self>, worker_address: &str) -> DataServiceResult<()> {
        if worker_address.is_empty() {
            return Err(DataServiceError::InvalidArgument(
                "worker_address must not be empty".to_string(),
            ));
        }
        self.state.lock().await.worker_address = worker_address.to_string();

        let retry_interval = Duration::from_millis(self.config.retry_interval_ms);
        loop {
            match self.heartbeat().await {
                Ok(()) => break,
                Err(e) if e.is_unavailable() => {
                    warn!(
                        "Failed to register with dispatcher at {}: {}. Will retry in {:?}",
                        self.config.dispatcher_address, e, retry_interval
                    );
                    tokio::time::sleep(retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.state.lock().await.registered = true;

        let heartbeat = HeartbeatManager::new(
            Arc::clone(self),
            Duration::from_millis(self.config.heartbeat_interval_ms),
        )
        .start(self.shutdown_tx.subscribe());
        let reporter = TaskCompletionReporter::new(Arc::clone(self), retry_interval)
            .start(self.shutdown_tx.subscribe());
        self.background_tasks
            .lock()
            .await
            .extend([heartbeat, reporter]);

        info!(
            "Worker {} registered with dispatcher running at {}",
            worker_address, self.config.dispatcher_address
        );
        Ok(())
    }

    /// 通知后台循环退出并等待它们结束
    pub async fn stop(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Worker background loops are not running");
        }
        let handles: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker background task ended abnormally: {}", e);
            }
        }
        info!("Worker stopped");
    }

    pub async fn is_registered(&self) -> bool {
        self.state.lock().await.registered
    }

    /// 发送一次心跳，并按Dispatcher的答复增删本地任务
    pub async fn heartbeat(&self) -> DataServiceResult<()> {
        let request = {
            let state = self.state.lock().await;
            let mut current_tasks: Vec<i64> = state.tasks.keys().copied().collect();
            current_tasks.sort();
            WorkerHeartbeatRequest {
                worker_address: state.worker_address.clone(),
                current_tasks,
            }
        };

        let response = call_with_timeout(
            self.dispatcher_timeout(),
            self.dispatcher.worker_heartbeat(request),
        )
        .await?;

        let mut state = self.state.lock().await;
        for task in response.new_tasks {
            self.add_task(&mut state, task);
        }
        for task_id in response.tasks_to_delete {
            state.pending_completed_tasks.remove(&task_id);
            if state.tasks.remove(&task_id).is_some() {
                info!("Deleted task {}", task_id);
            }
        }
        gauge!("dataservice_worker_tasks").set(state.tasks.len() as f64);
        Ok(())
    }

    /// 把待上报的完成任务一次性发给Dispatcher，返回上报的任务数
    pub async fn send_task_updates(&self) -> DataServiceResult<usize> {
        let (worker_address, task_ids) = {
            let state = self.state.lock().await;
            (
                state.worker_address.clone(),
                state.pending_completed_tasks.iter().copied().collect::<Vec<_>>(),
            )
        };
        if task_ids.is_empty() {
            return Ok(0);
        }

        let updates = task_ids
            .iter()
            .map(|&task_id| TaskProgress {
                task_id,
                completed: true,
            })
            .collect();
        call_with_timeout(
            self.dispatcher_timeout(),
            self.dispatcher.worker_update(WorkerUpdateRequest {
                worker_address,
                updates,
            }),
        )
        .await?;

        let mut state = self.state.lock().await;
        for task_id in &task_ids {
            state.pending_completed_tasks.remove(task_id);
        }
        debug!("Reported {} completed tasks to dispatcher", task_ids.len());
        Ok(task_ids.len())
    }

    pub(crate) fn task_completed(&self) -> &Notify {
        &self.task_completed
    }

    fn add_task(&self, state: &mut WorkerState, task: TaskDef) {
        if state.tasks.contains_key(&task.task_id) {
            debug!("Task {} has already been received", task.task_id);
            return;
        }

        info!(
            "Received task {} of job {} for dataset {}",
            task.task_id, task.job_id, task.dataset_id
        );
        let task_id = task.task_id;
        let runner = TaskRunner::new(
            task,
            Arc::clone(&self.engine),
            Arc::clone(&self.dispatcher),
            self.dispatcher_timeout(),
        );
        state.tasks.insert(task_id, Arc::new(runner));
    }
}

#[async_trait]
impl WorkerService for Worker {
    async fn process_task(&self, request: ProcessTaskRequest) -> DataServiceResult<ProcessTaskResponse> {
        let mut state = self.state.lock().await;
        self.add_task(&mut state, request.task);
        gauge!("dataservice_worker_tasks").set(state.tasks.len() as f64);
        Ok(ProcessTaskResponse::default())
    }

    async fn get_element(&self, request: GetElementRequest) -> DataServiceResult<GetElementResponse> {
        let task = {
            let state = self.state.lock().await;
            if !state.registered {
                return Err(DataServiceError::Unavailable(
                    "Worker has not yet registered with dispatcher.".to_string(),
                ));
            }
            match state.tasks.get(&request.task_id) {
                Some(task) => Arc::clone(task),
                None => {
                    debug!("Task {} not found on this worker", request.task_id);
                    return Ok(GetElementResponse::end_of_sequence());
                }
            }
        };

        match task.next().await? {
            NextElement::Element(element) => {
                counter!("dataservice_worker_elements_produced_total").increment(1);
                Ok(GetElementResponse {
                    element: Some(element),
                    end_of_sequence: false,
                })
            }
            NextElement::Finished => {
                info!("Reached end of sequence for task {}", request.task_id);
                self.state
                    .lock()
                    .await
                    .pending_completed_tasks
                    .insert(request.task_id);
                self.task_completed.notify_one();
                Ok(GetElementResponse::end_of_sequence())
            }
            NextElement::AlreadyFinished => Ok(GetElementResponse::end_of_sequence()),
        }
    }

    async fn get_worker_tasks(
        &self,
        _request: GetWorkerTasksRequest,
    ) -> DataServiceResult<GetWorkerTasksResponse> {
        let (worker_address, runners) = {
            let state = self.state.lock().await;
            let mut runners: Vec<Arc<TaskRunner>> = state.tasks.values().cloned().collect();
            runners.sort_by_key(|runner| runner.task_def().task_id);
            (state.worker_address.clone(), runners)
        };

        let mut tasks = Vec::with_capacity(runners.len());
        for runner in runners {
            tasks.push(TaskInfo {
                worker_address: worker_address.clone(),
                task_id: runner.task_def().task_id,
                job_id: runner.task_def().job_id,
                finished: runner.is_finished().await,
            });
        }
        Ok(GetWorkerTasksResponse { tasks })
    }
}
