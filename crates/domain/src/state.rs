use std::collections::{BTreeMap, BTreeSet};

use dataservice_core::{models::ProcessingMode, DataServiceError, DataServiceResult};

use crate::entities::{Dataset, Job, NamedJobKey, Task, Worker};
use crate::updates::Update;

pub const FIRST_DATASET_ID: i64 = 1000;
pub const FIRST_JOB_ID: i64 = 2000;
pub const FIRST_JOB_CLIENT_ID: i64 = 3000;
pub const FIRST_TASK_ID: i64 = 4000;

/// Dispatcher的权威内存状态
///
/// 只能通过 [`DispatcherState::apply`] 修改。从空状态按相同顺序重放相同的更新序列，
/// 得到的状态完全一致（所有集合都使用有序容器）。非法更新会在修改任何字段之前被拒绝。
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherState {
    datasets_by_id: BTreeMap<i64, Dataset>,
    datasets_by_fingerprint: BTreeMap<u64, i64>,
    workers: BTreeMap<String, Worker>,
    jobs: BTreeMap<i64, Job>,
    named_jobs: BTreeMap<NamedJobKey, i64>,
    jobs_for_client_ids: BTreeMap<i64, i64>,
    tasks: BTreeMap<i64, Task>,
    tasks_by_job: BTreeMap<i64, Vec<i64>>,
    /// 每个Worker当前未完成的任务
    tasks_by_worker: BTreeMap<String, BTreeSet<i64>>,
    next_available_dataset_id: i64,
    next_available_job_id: i64,
    next_available_job_client_id: i64,
    next_available_task_id: i64,
}

impl Default for DispatcherState {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherState {
    pub fn new() -> Self {
        Self {
            datasets_by_id: BTreeMap::new(),
            datasets_by_fingerprint: BTreeMap::new(),
            workers: BTreeMap::new(),
            jobs: BTreeMap::new(),
            named_jobs: BTreeMap::new(),
            jobs_for_client_ids: BTreeMap::new(),
            tasks: BTreeMap::new(),
            tasks_by_job: BTreeMap::new(),
            tasks_by_worker: BTreeMap::new(),
            next_available_dataset_id: FIRST_DATASET_ID,
            next_available_job_id: FIRST_JOB_ID,
            next_available_job_client_id: FIRST_JOB_CLIENT_ID,
            next_available_task_id: FIRST_TASK_ID,
        }
    }

    /// 应用一条状态变更
    pub fn apply(&mut self, update: &Update) -> DataServiceResult<()> {
        match update {
            Update::RegisterDataset {
                dataset_id,
                fingerprint,
            } => self.register_dataset(*dataset_id, *fingerprint),
            Update::RegisterWorker { worker_address } => self.register_worker(worker_address),
            Update::CreateJob {
                job_id,
                dataset_id,
                processing_mode,
                named_job_key,
            } => self.create_job(*job_id, *dataset_id, *processing_mode, named_job_key.clone()),
            Update::AcquireJobClient {
                job_client_id,
                job_id,
            } => self.acquire_job_client(*job_client_id, *job_id),
            Update::ReleaseJobClient {
                job_client_id,
                time_micros,
            } => self.release_job_client(*job_client_id, *time_micros),
            Update::CreateTask {
                task_id,
                job_id,
                dataset_id,
                processing_mode,
                worker_address,
            } => self.create_task(*task_id, *job_id, *dataset_id, *processing_mode, worker_address),
            Update::FinishTask { task_id } => self.finish_task(*task_id),
            Update::FinishJob { job_id } => self.finish_job(*job_id),
        }
    }

    fn register_dataset(&mut self, dataset_id: i64, fingerprint: u64) -> DataServiceResult<()> {
        if self.datasets_by_id.contains_key(&dataset_id) {
            return Err(DataServiceError::AlreadyExists(format!(
                "dataset {dataset_id}"
            )));
        }
        if let Some(existing) = self.datasets_by_fingerprint.get(&fingerprint) {
            return Err(DataServiceError::AlreadyExists(format!(
                "fingerprint {fingerprint} already registered as dataset {existing}"
            )));
        }

        self.datasets_by_id.insert(
            dataset_id,
            Dataset {
                dataset_id,
                fingerprint,
            },
        );
        self.datasets_by_fingerprint.insert(fingerprint, dataset_id);
        self.next_available_dataset_id = self.next_available_dataset_id.max(dataset_id + 1);
        Ok(())
    }

    fn register_worker(&mut self, worker_address: &str) -> DataServiceResult<()> {
        if self.workers.contains_key(worker_address) {
            return Err(DataServiceError::AlreadyExists(format!(
                "worker {worker_address}"
            )));
        }

        self.workers.insert(
            worker_address.to_string(),
            Worker {
                address: worker_address.to_string(),
            },
        );
        self.tasks_by_worker
            .insert(worker_address.to_string(), BTreeSet::new());
        Ok(())
    }

    fn create_job(
        &mut self,
        job_id: i64,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        named_job_key: Option<NamedJobKey>,
    ) -> DataServiceResult<()> {
        if !self.datasets_by_id.contains_key(&dataset_id) {
            return Err(DataServiceError::DatasetNotFound { id: dataset_id });
        }
        if self.jobs.contains_key(&job_id) {
            return Err(DataServiceError::AlreadyExists(format!("job {job_id}")));
        }
        if let Some(key) = &named_job_key {
            if self.named_jobs.contains_key(key) {
                return Err(DataServiceError::AlreadyExists(format!("named job {key}")));
            }
            self.named_jobs.insert(key.clone(), job_id);
        }

        self.jobs.insert(
            job_id,
            Job::new(job_id, dataset_id, processing_mode, named_job_key),
        );
        self.tasks_by_job.insert(job_id, Vec::new());
        self.next_available_job_id = self.next_available_job_id.max(job_id + 1);
        Ok(())
    }

    fn acquire_job_client(&mut self, job_client_id: i64, job_id: i64) -> DataServiceResult<()> {
        if self.jobs_for_client_ids.contains_key(&job_client_id) {
            return Err(DataServiceError::AlreadyExists(format!(
                "job client {job_client_id}"
            )));
        }
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(DataServiceError::JobNotFound { id: job_id })?;

        job.num_clients += 1;
        self.jobs_for_client_ids.insert(job_client_id, job_id);
        self.next_available_job_client_id =
            self.next_available_job_client_id.max(job_client_id + 1);
        Ok(())
    }

    fn release_job_client(&mut self, job_client_id: i64, time_micros: i64) -> DataServiceResult<()> {
        let job_id = *self
            .jobs_for_client_ids
            .get(&job_client_id)
            .ok_or(DataServiceError::JobClientNotFound { id: job_client_id })?;
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(DataServiceError::JobNotFound { id: job_id })?;

        job.num_clients -= 1;
        job.last_client_released_micros = time_micros;
        self.jobs_for_client_ids.remove(&job_client_id);
        Ok(())
    }

    fn create_task(
        &mut self,
        task_id: i64,
        job_id: i64,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        worker_address: &str,
    ) -> DataServiceResult<()> {
        if self.tasks.contains_key(&task_id) {
            return Err(DataServiceError::AlreadyExists(format!("task {task_id}")));
        }
        if !self.workers.contains_key(worker_address) {
            return Err(DataServiceError::WorkerNotFound {
                address: worker_address.to_string(),
            });
        }
        let job_tasks = self
            .tasks_by_job
            .get(&job_id)
            .ok_or(DataServiceError::JobNotFound { id: job_id })?;
        let duplicate = job_tasks
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .any(|task| task.worker_address == worker_address);
        if duplicate {
            return Err(DataServiceError::AlreadyExists(format!(
                "job {job_id} already has a task on worker {worker_address}"
            )));
        }

        self.tasks.insert(
            task_id,
            Task {
                task_id,
                job_id,
                dataset_id,
                processing_mode,
                worker_address: worker_address.to_string(),
                finished: false,
            },
        );
        self.tasks_by_job.entry(job_id).or_default().push(task_id);
        self.tasks_by_worker
            .entry(worker_address.to_string())
            .or_default()
            .insert(task_id);
        self.next_available_task_id = self.next_available_task_id.max(task_id + 1);
        Ok(())
    }

    fn finish_task(&mut self, task_id: i64) -> DataServiceResult<()> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(DataServiceError::TaskNotFound { id: task_id })?;

        task.finished = true;
        if let Some(worker_tasks) = self.tasks_by_worker.get_mut(&task.worker_address) {
            worker_tasks.remove(&task_id);
        }
        Ok(())
    }

    fn finish_job(&mut self, job_id: i64) -> DataServiceResult<()> {
        let unfinished = self
            .tasks_by_job
            .get(&job_id)
            .ok_or(DataServiceError::JobNotFound { id: job_id })?
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|task| !task.finished))
            .count();
        if unfinished > 0 {
            return Err(DataServiceError::FailedPrecondition(format!(
                "job {job_id} still has {unfinished} unfinished tasks"
            )));
        }

        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(DataServiceError::JobNotFound { id: job_id })?;
        job.finished = true;
        Ok(())
    }

    pub fn dataset_from_id(&self, dataset_id: i64) -> DataServiceResult<Dataset> {
        self.datasets_by_id
            .get(&dataset_id)
            .cloned()
            .ok_or(DataServiceError::DatasetNotFound { id: dataset_id })
    }

    pub fn dataset_from_fingerprint(&self, fingerprint: u64) -> DataServiceResult<Dataset> {
        self.datasets_by_fingerprint
            .get(&fingerprint)
            .and_then(|id| self.datasets_by_id.get(id))
            .cloned()
            .ok_or_else(|| {
                DataServiceError::NotFound(format!("dataset with fingerprint {fingerprint}"))
            })
    }

    pub fn job_from_id(&self, job_id: i64) -> DataServiceResult<Job> {
        self.jobs
            .get(&job_id)
            .cloned()
            .ok_or(DataServiceError::JobNotFound { id: job_id })
    }

    pub fn named_job_by_key(&self, key: &NamedJobKey) -> DataServiceResult<Job> {
        self.named_jobs
            .get(key)
            .and_then(|id| self.jobs.get(id))
            .cloned()
            .ok_or_else(|| DataServiceError::NotFound(format!("named job {key}")))
    }

    pub fn task_from_id(&self, task_id: i64) -> DataServiceResult<Task> {
        self.tasks
            .get(&task_id)
            .cloned()
            .ok_or(DataServiceError::TaskNotFound { id: task_id })
    }

    /// 作业的全部任务（包括已完成的）
    pub fn tasks_for_job(&self, job_id: i64) -> DataServiceResult<Vec<Task>> {
        let task_ids = self
            .tasks_by_job
            .get(&job_id)
            .ok_or(DataServiceError::JobNotFound { id: job_id })?;
        Ok(task_ids
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect())
    }

    /// Worker上尚未完成的任务；未注册的Worker返回NotFound
    pub fn tasks_for_worker(&self, worker_address: &str) -> DataServiceResult<Vec<Task>> {
        let task_ids = self
            .tasks_by_worker
            .get(worker_address)
            .ok_or_else(|| DataServiceError::WorkerNotFound {
                address: worker_address.to_string(),
            })?;
        Ok(task_ids
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect())
    }

    pub fn job_for_job_client_id(&self, job_client_id: i64) -> DataServiceResult<Job> {
        self.jobs_for_client_ids
            .get(&job_client_id)
            .and_then(|id| self.jobs.get(id))
            .cloned()
            .ok_or(DataServiceError::JobClientNotFound { id: job_client_id })
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs.values().cloned().collect()
    }

    pub fn list_workers(&self) -> Vec<Worker> {
        self.workers.values().cloned().collect()
    }

    pub fn next_available_dataset_id(&self) -> i64 {
        self.next_available_dataset_id
    }

    pub fn next_available_job_id(&self) -> i64 {
        self.next_available_job_id
    }

    pub fn next_available_job_client_id(&self) -> i64 {
        self.next_available_job_client_id
    }

    pub fn next_available_task_id(&self) -> i64 {
        self.next_available_task_id
    }
}
