use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use dataservice_core::{
    config::DispatcherConfig,
    models::*,
    traits::{DatasetEngine, DatasetStore, DispatcherService, WorkerClientFactory, WorkerService},
    DataServiceError, DataServiceResult,
};
use dataservice_domain::{DispatcherState, Job, NamedJobKey, Task, Update};
use dataservice_infrastructure::{
    datasets_dir, journal_dir, DatasetStoreFactory, FileJournalReader, FileJournalWriter,
    JournalReader, JournalWriter,
};

use crate::dataset_graph::{fingerprint, prepare_dataset};
use crate::distributed_epoch::DistributedEpochJob;

/// 受Dispatcher锁保护的全部可变状态
struct DispatcherInner {
    state: DispatcherState,
    journal_writer: Option<Box<dyn JournalWriter>>,
    distributed_epoch_jobs: HashMap<i64, DistributedEpochJob>,
    started: bool,
}

impl DispatcherInner {
    fn check_started(&self) -> DataServiceResult<()> {
        if !self.started {
            return Err(DataServiceError::Unavailable(
                "Dispatcher has not started yet.".to_string(),
            ));
        }
        Ok(())
    }

    /// 先写日志再修改状态，日志写入失败时状态保持不变
    async fn apply(&mut self, update: Update) -> DataServiceResult<()> {
        if let Some(writer) = self.journal_writer.as_mut() {
            writer.write(&update).await?;
        }
        self.state.apply(&update)
    }

    async fn create_job(
        &mut self,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        named_job_key: Option<NamedJobKey>,
    ) -> DataServiceResult<Job> {
        self.state.dataset_from_id(dataset_id)?;

        let job_id = self.state.next_available_job_id();
        self.apply(Update::CreateJob {
            job_id,
            dataset_id,
            processing_mode,
            named_job_key,
        })
        .await?;
        if processing_mode == ProcessingMode::DistributedEpoch {
            self.distributed_epoch_jobs
                .insert(job_id, DistributedEpochJob::new(job_id, dataset_id));
        }

        counter!("dataservice_dispatcher_jobs_created_total").increment(1);
        info!(
            "Created job {} for dataset {} in {} mode",
            job_id, dataset_id, processing_mode
        );
        self.state.job_from_id(job_id)
    }

    async fn acquire_job_client(&mut self, job_id: i64) -> DataServiceResult<i64> {
        let job_client_id = self.state.next_available_job_client_id();
        self.apply(Update::AcquireJobClient {
            job_client_id,
            job_id,
        })
        .await?;
        debug!("Acquired job client {} for job {}", job_client_id, job_id);
        Ok(job_client_id)
    }

    async fn create_task(&mut self, job: &Job, worker_address: &str) -> DataServiceResult<Task> {
        let task_id = self.state.next_available_task_id();
        self.apply(Update::CreateTask {
            task_id,
            job_id: job.job_id,
            dataset_id: job.dataset_id,
            processing_mode: job.processing_mode,
            worker_address: worker_address.to_string(),
        })
        .await?;

        counter!("dataservice_dispatcher_tasks_created_total").increment(1);
        info!(
            "Created task {} for job {} on worker {}",
            task_id, job.job_id, worker_address
        );
        self.state.task_from_id(task_id)
    }

    async fn create_tasks_for_job(&mut self, job: &Job) -> DataServiceResult<Vec<Task>> {
        let workers = self.state.list_workers();
        let mut tasks = Vec::with_capacity(workers.len());
        for worker in workers {
            tasks.push(self.create_task(job, &worker.address).await?);
        }
        Ok(tasks)
    }

    /// 创建作业、为每个Worker创建任务，最后获取客户端
    ///
    /// 获取客户端放在最后：中途失败时作业没有客户端，由回收循环按 [`Job::is_abandoned`] 清理，
    /// 缺失的任务由心跳补齐。
    async fn create_job_with_client(
        &mut self,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        named_job_key: Option<NamedJobKey>,
    ) -> DataServiceResult<(i64, Vec<Task>)> {
        let job = self
            .create_job(dataset_id, processing_mode, named_job_key)
            .await?;
        let tasks = self.create_tasks_for_job(&job).await?;
        let job_client_id = self.acquire_job_client(job.job_id).await?;
        Ok((job_client_id, tasks))
    }

    /// 确保Worker在每个进行中的作业上都有一个任务，返回它当前未完成的任务
    ///
    /// 每次心跳都会执行，之前因写日志失败而没建成的任务在这里补上。
    async fn reconcile_worker_tasks(&mut self, worker_address: &str) -> DataServiceResult<Vec<Task>> {
        let jobs: Vec<Job> = self
            .state
            .list_jobs()
            .into_iter()
            .filter(|job| !job.finished && !job.is_abandoned())
            .collect();
        for job in &jobs {
            let has_task = self
                .state
                .tasks_for_job(job.job_id)?
                .iter()
                .any(|task| task.worker_address == worker_address);
            if !has_task {
                self.create_task(job, worker_address).await?;
            }
        }
        self.state.tasks_for_worker(worker_address)
    }
}

fn validate_matching_job(job: &Job, request: &GetOrCreateJobRequest) -> DataServiceResult<()> {
    if job.processing_mode != request.processing_mode {
        return Err(DataServiceError::FailedPrecondition(format!(
            "Tried to create a job with name {} and index {}, but found an existing job with \
             processing mode {} instead of the requested {}",
            request.job_name, request.job_name_index, job.processing_mode, request.processing_mode
        )));
    }
    if job.dataset_id != request.dataset_id {
        return Err(DataServiceError::FailedPrecondition(format!(
            "Tried to create a job with name {} and index {}, but found an existing job for \
             dataset {} instead of the requested {}",
            request.job_name, request.job_name_index, job.dataset_id, request.dataset_id
        )));
    }
    Ok(())
}

/// 数据服务Dispatcher
///
/// 所有公开操作都在持有同一把锁期间完成，包括日志IO和状态修改，日志记录顺序即状态生效顺序。
/// 这使写路径成为单写者瓶颈。向Worker发起的RPC不会在持锁时进行。
pub struct Dispatcher {
    config: DispatcherConfig,
    engine: Arc<dyn DatasetEngine>,
    dataset_store: Arc<dyn DatasetStore>,
    worker_client_factory: Arc<dyn WorkerClientFactory>,
    worker_clients: RwLock<HashMap<String, Arc<dyn WorkerService>>>,
    inner: Mutex<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        engine: Arc<dyn DatasetEngine>,
        worker_client_factory: Arc<dyn WorkerClientFactory>,
    ) -> Self {
        let dataset_store = DatasetStoreFactory::create(&config.work_dir);
        Self {
            config,
            engine,
            dataset_store,
            worker_client_factory,
            worker_clients: RwLock::new(HashMap::new()),
            inner: Mutex::new(DispatcherInner {
                state: DispatcherState::new(),
                journal_writer: None,
                distributed_epoch_jobs: HashMap::new(),
                started: false,
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// 启动Dispatcher；容错模式下重放日志恢复状态
    pub async fn start(&self) -> DataServiceResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.started {
            return Ok(());
        }

        if self.config.work_dir.is_empty() {
            if self.config.fault_tolerant_mode {
                return Err(DataServiceError::InvalidArgument(
                    "fault_tolerant_mode is True, but no work_dir is configured".to_string(),
                ));
            }
        } else {
            tokio::fs::create_dir_all(datasets_dir(&self.config.work_dir)).await?;
        }

        if !self.config.fault_tolerant_mode {
            info!(
                "Running with fault_tolerant_mode=False. The dispatcher will not be able to \
                 recover its state on restart."
            );
            inner.started = true;
            return Ok(());
        }

        let journal_dir = journal_dir(&self.config.work_dir);
        let mut reader = FileJournalReader::new(&journal_dir);
        let mut replayed = 0usize;
        loop {
            match reader.read().await {
                Ok(Some(update)) => {
                    inner.state.apply(&update)?;
                    replayed += 1;
                }
                Ok(None) => break,
                Err(e) if e.is_not_found() => {
                    info!("No journal found. Starting dispatcher from new state.");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        // 切片进度不在日志中，恢复出的分布式epoch作业从头开始分发切片
        let recovered_jobs: Vec<Job> = inner
            .state
            .list_jobs()
            .into_iter()
            .filter(|job| job.processing_mode == ProcessingMode::DistributedEpoch && !job.finished)
            .collect();
        for job in recovered_jobs {
            inner
                .distributed_epoch_jobs
                .insert(job.job_id, DistributedEpochJob::new(job.job_id, job.dataset_id));
        }

        let mut writer = FileJournalWriter::new(journal_dir);
        writer.ensure_initialized().await?;
        inner.journal_writer = Some(Box::new(writer));
        inner.started = true;

        info!(
            "Restored {} journal records, {} jobs, {} workers",
            replayed,
            inner.state.list_jobs().len(),
            inner.state.list_workers().len()
        );
        Ok(())
    }

    /// 当前状态的快照
    pub async fn state(&self) -> DispatcherState {
        self.inner.lock().await.state.clone()
    }

    /// 回收所有在 `now_micros` 时刻已空闲超时的作业以及创建中途失败的作业，返回本次回收的作业数
    pub async fn gc_old_jobs(&self, now_micros: i64) -> DataServiceResult<usize> {
        let mut inner = self.inner.lock().await;
        if !inner.started {
            return Ok(0);
        }

        let timeout_micros = i64::try_from(self.config.job_gc_timeout_ms)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let candidates: Vec<Job> = inner
            .state
            .list_jobs()
            .into_iter()
            .filter(|job| job.is_gc_eligible(now_micros, timeout_micros) || job.is_abandoned())
            .collect();

        for job in &candidates {
            for task in inner.state.tasks_for_job(job.job_id)? {
                if !task.finished {
                    inner
                        .apply(Update::FinishTask {
                            task_id: task.task_id,
                        })
                        .await?;
                }
            }
            inner.apply(Update::FinishJob { job_id: job.job_id }).await?;
            inner.distributed_epoch_jobs.remove(&job.job_id);

            counter!("dataservice_dispatcher_jobs_gc_total").increment(1);
            info!("Job {} has been garbage collected", job.job_id);
        }
        Ok(candidates.len())
    }

    async fn task_def(&self, state: &DispatcherState, task: &Task) -> DataServiceResult<TaskDef> {
        let dataset = state.dataset_from_id(task.dataset_id)?;
        let source = if self.config.work_dir.is_empty() {
            DatasetSource::Inline(self.dataset_store.get(&dataset.key()).await?.as_ref().clone())
        } else {
            DatasetSource::Path(
                datasets_dir(&self.config.work_dir)
                    .join(dataset.key())
                    .to_string_lossy()
                    .into_owned(),
            )
        };

        Ok(TaskDef {
            task_id: task.task_id,
            job_id: task.job_id,
            dataset_id: task.dataset_id,
            processing_mode: task.processing_mode,
            dataset: source,
        })
    }

    async fn get_or_create_worker_client(
        &self,
        worker_address: &str,
    ) -> DataServiceResult<Arc<dyn WorkerService>> {
        if let Some(client) = self.worker_clients.read().await.get(worker_address) {
            return Ok(Arc::clone(client));
        }

        let client = self
            .worker_client_factory
            .create_worker_client(worker_address)
            .await?;
        // 并发创建时保留先写入的客户端
        let mut clients = self.worker_clients.write().await;
        Ok(Arc::clone(
            clients.entry(worker_address.to_string()).or_insert(client),
        ))
    }

    /// 把任务推送给对应的Worker，失败时任务保留，Worker下次心跳会重新拿到
    pub async fn assign_task(&self, task: &Task) -> DataServiceResult<()> {
        let task_def = {
            let inner = self.inner.lock().await;
            self.task_def(&inner.state, task).await?
        };

        let client = self
            .get_or_create_worker_client(&task.worker_address)
            .await?;
        client
            .process_task(ProcessTaskRequest { task: task_def })
            .await
            .map_err(|e| {
                DataServiceError::from_code(
                    e.code(),
                    format!(
                        "Failed to submit task to worker {}: {}",
                        task.worker_address, e
                    ),
                )
            })?;
        debug!(
            "Assigned task {} to worker {}",
            task.task_id, task.worker_address
        );
        Ok(())
    }

    async fn assign_tasks(&self, tasks: Vec<Task>) {
        for task in tasks {
            if let Err(e) = self.assign_task(&task).await {
                counter!("dataservice_dispatcher_task_assignment_failures_total").increment(1);
                warn!("{}", e);
            }
        }
    }
}

#[async_trait]
impl DispatcherService for Dispatcher {
    async fn worker_heartbeat(
        &self,
        request: WorkerHeartbeatRequest,
    ) -> DataServiceResult<WorkerHeartbeatResponse> {
        let mut inner = self.inner.lock().await;
        inner.check_started()?;
        if request.worker_address.is_empty() {
            return Err(DataServiceError::InvalidArgument(
                "worker_address must not be empty".to_string(),
            ));
        }
        counter!("dataservice_dispatcher_heartbeats_total").increment(1);
        debug!("Received heartbeat from worker {}", request.worker_address);

        let worker_address = request.worker_address;
        match inner.state.tasks_for_worker(&worker_address) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                inner
                    .apply(Update::RegisterWorker {
                        worker_address: worker_address.clone(),
                    })
                    .await?;
                info!("Registered new worker {}", worker_address);
            }
            Err(e) => return Err(e),
        }
        let tasks = inner.reconcile_worker_tasks(&worker_address).await?;

        let reported: HashSet<i64> = request.current_tasks.iter().copied().collect();
        let authoritative: HashSet<i64> = tasks.iter().map(|task| task.task_id).collect();

        let mut response = WorkerHeartbeatResponse::default();
        for task in tasks.iter().filter(|task| !reported.contains(&task.task_id)) {
            response.new_tasks.push(self.task_def(&inner.state, task).await?);
        }
        response.tasks_to_delete = request
            .current_tasks
            .into_iter()
            .filter(|task_id| !authoritative.contains(task_id))
            .collect();

        if !response.new_tasks.is_empty() || !response.tasks_to_delete.is_empty() {
            debug!(
                "Heartbeat for worker {}: {} new tasks, {} tasks to delete",
                worker_address,
                response.new_tasks.len(),
                response.tasks_to_delete.len()
            );
        }
        Ok(response)
    }

    async fn worker_update(&self, request: WorkerUpdateRequest) -> DataServiceResult<WorkerUpdateResponse> {
        let mut inner = self.inner.lock().await;
        inner.check_started()?;

        for update in request.updates.iter().filter(|update| update.completed) {
            let task = inner.state.task_from_id(update.task_id)?;
            if task.finished {
                debug!("Received completion for already finished task {}", task.task_id);
                continue;
            }
            inner
                .apply(Update::FinishTask {
                    task_id: task.task_id,
                })
                .await?;
            info!(
                "Task {} from job {} completed on worker {}",
                task.task_id, task.job_id, request.worker_address
            );
        }
        Ok(WorkerUpdateResponse::default())
    }

    async fn get_dataset_def(
        &self,
        request: GetDatasetDefRequest,
    ) -> DataServiceResult<GetDatasetDefResponse> {
        let inner = self.inner.lock().await;
        inner.check_started()?;

        let dataset = inner.state.dataset_from_id(request.dataset_id)?;
        let dataset_def = self.dataset_store.get(&dataset.key()).await?;
        Ok(GetDatasetDefResponse {
            dataset_def: dataset_def.as_ref().clone(),
        })
    }

    async fn get_split(&self, request: GetSplitRequest) -> DataServiceResult<GetSplitResponse> {
        let mut guard = self.inner.lock().await;
        guard.check_started()?;
        let inner = &mut *guard;

        let job = inner
            .distributed_epoch_jobs
            .get_mut(&request.job_id)
            .ok_or_else(|| {
                DataServiceError::NotFound(format!(
                    "distributed_epoch_job {} not found",
                    request.job_id
                ))
            })?;

        if job.split_provider(request.repetition).is_none() {
            let dataset = inner.state.dataset_from_id(job.dataset_id)?;
            let dataset_def = self.dataset_store.get(&dataset.key()).await?;
            let split_provider = self.engine.make_split_provider(&dataset_def)?;
            job.insert_split_provider(request.repetition, split_provider);
            debug!(
                "Created split provider for job {} repetition {}",
                request.job_id, request.repetition
            );
        }

        let split_provider = job.split_provider(request.repetition).ok_or_else(|| {
            DataServiceError::Internal(format!(
                "split provider for job {} repetition {} missing",
                request.job_id, request.repetition
            ))
        })?;
        let split = split_provider.get_next().await?;
        let end_of_splits = split.is_none();
        if end_of_splits {
            debug!(
                "Job {} repetition {} has no more splits",
                request.job_id, request.repetition
            );
        }
        Ok(GetSplitResponse {
            split,
            end_of_splits,
        })
    }

    async fn get_or_register_dataset(
        &self,
        request: GetOrRegisterDatasetRequest,
    ) -> DataServiceResult<GetOrRegisterDatasetResponse> {
        let prepared = prepare_dataset(&request.dataset);
        let fingerprint = fingerprint(&prepared)?;

        let mut inner = self.inner.lock().await;
        inner.check_started()?;

        match inner.state.dataset_from_fingerprint(fingerprint) {
            Ok(dataset) => {
                debug!(
                    "Found existing dataset {} with fingerprint {}",
                    dataset.dataset_id, fingerprint
                );
                return Ok(GetOrRegisterDatasetResponse {
                    dataset_id: dataset.dataset_id,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let dataset_id = inner.state.next_available_dataset_id();
        self.dataset_store
            .put(
                &dataservice_domain::dataset_key(dataset_id, fingerprint),
                &prepared,
            )
            .await?;
        inner
            .apply(Update::RegisterDataset {
                dataset_id,
                fingerprint,
            })
            .await?;

        counter!("dataservice_dispatcher_datasets_registered_total").increment(1);
        info!(
            "Registered dataset {} with fingerprint {}",
            dataset_id, fingerprint
        );
        Ok(GetOrRegisterDatasetResponse { dataset_id })
    }

    async fn create_job(&self, request: CreateJobRequest) -> DataServiceResult<CreateJobResponse> {
        let (job_client_id, tasks) = {
            let mut inner = self.inner.lock().await;
            inner.check_started()?;
            inner
                .create_job_with_client(request.dataset_id, request.processing_mode, None)
                .await?
        };

        self.assign_tasks(tasks).await;
        Ok(CreateJobResponse { job_client_id })
    }

    async fn get_or_create_job(
        &self,
        request: GetOrCreateJobRequest,
    ) -> DataServiceResult<GetOrCreateJobResponse> {
        if request.job_name.is_empty() {
            return Err(DataServiceError::InvalidArgument(
                "job_name must not be empty".to_string(),
            ));
        }
        let key = NamedJobKey::new(request.job_name.clone(), request.job_name_index);

        let (job_client_id, tasks) = {
            let mut inner = self.inner.lock().await;
            inner.check_started()?;
            match inner.state.named_job_by_key(&key) {
                Ok(job) => {
                    validate_matching_job(&job, &request)?;
                    let job_client_id = inner.acquire_job_client(job.job_id).await?;
                    debug!("Found existing job {} for key {}", job.job_id, key);
                    (job_client_id, Vec::new())
                }
                Err(e) if e.is_not_found() => {
                    inner
                        .create_job_with_client(
                            request.dataset_id,
                            request.processing_mode,
                            Some(key),
                        )
                        .await?
                }
                Err(e) => return Err(e),
            }
        };

        self.assign_tasks(tasks).await;
        Ok(GetOrCreateJobResponse { job_client_id })
    }

    async fn release_job_client(
        &self,
        request: ReleaseJobClientRequest,
    ) -> DataServiceResult<ReleaseJobClientResponse> {
        let mut inner = self.inner.lock().await;
        inner.check_started()?;

        let job = inner.state.job_for_job_client_id(request.job_client_id)?;
        inner
            .apply(Update::ReleaseJobClient {
                job_client_id: request.job_client_id,
                time_micros: Utc::now().timestamp_micros(),
            })
            .await?;
        info!(
            "Released job client {} of job {}",
            request.job_client_id, job.job_id
        );
        Ok(ReleaseJobClientResponse::default())
    }

    async fn get_tasks(&self, request: GetTasksRequest) -> DataServiceResult<GetTasksResponse> {
        let inner = self.inner.lock().await;
        inner.check_started()?;

        let job = match inner.state.job_for_job_client_id(request.job_client_id) {
            Ok(job) => job,
            Err(e) if e.is_not_found() && !self.config.fault_tolerant_mode => {
                return Err(DataServiceError::NotFound(format!(
                    "Unknown job client id {}. The dispatcher is not configured to be fault \
                     tolerant, so this could be caused by a dispatcher restart.",
                    request.job_client_id
                )));
            }
            Err(e) => return Err(e),
        };

        let task_info = inner
            .state
            .tasks_for_job(job.job_id)?
            .into_iter()
            .map(|task| TaskInfo {
                worker_address: task.worker_address,
                task_id: task.task_id,
                job_id: task.job_id,
                finished: task.finished,
            })
            .collect();
        Ok(GetTasksResponse {
            task_info,
            job_finished: job.finished,
        })
    }

    async fn get_workers(&self, _request: GetWorkersRequest) -> DataServiceResult<GetWorkersResponse> {
        let inner = self.inner.lock().await;
        inner.check_started()?;

        let workers = inner
            .state
            .list_workers()
            .into_iter()
            .map(|worker| WorkerInfo {
                address: worker.address,
            })
            .collect();
        Ok(GetWorkersResponse { workers })
    }
}
