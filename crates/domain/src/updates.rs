use serde::{Deserialize, Serialize};

use dataservice_core::models::ProcessingMode;

use crate::entities::NamedJobKey;

/// 状态变更记录
///
/// 每个变体对应一种状态转换，是 `DispatcherState` 唯一的修改入口，同时也是日志的记录格式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    RegisterDataset {
        dataset_id: i64,
        fingerprint: u64,
    },
    RegisterWorker {
        worker_address: String,
    },
    CreateJob {
        job_id: i64,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        named_job_key: Option<NamedJobKey>,
    },
    AcquireJobClient {
        job_client_id: i64,
        job_id: i64,
    },
    ReleaseJobClient {
        job_client_id: i64,
        time_micros: i64,
    },
    CreateTask {
        task_id: i64,
        job_id: i64,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        worker_address: String,
    },
    FinishTask {
        task_id: i64,
    },
    /// 作业回收时，在其全部任务完成后写入
    FinishJob {
        job_id: i64,
    },
}

impl Update {
    pub fn kind(&self) -> &'static str {
        match self {
            Update::RegisterDataset { .. } => "register_dataset",
            Update::RegisterWorker { .. } => "register_worker",
            Update::CreateJob { .. } => "create_job",
            Update::AcquireJobClient { .. } => "acquire_job_client",
            Update::ReleaseJobClient { .. } => "release_job_client",
            Update::CreateTask { .. } => "create_task",
            Update::FinishTask { .. } => "finish_task",
            Update::FinishJob { .. } => "finish_job",
        }
    }
}
