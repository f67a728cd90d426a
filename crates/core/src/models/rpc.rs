//! Dispatcher与Worker之间RPC的请求/响应消息

use serde::{Deserialize, Serialize};

use super::{DatasetDef, Element, ProcessingMode, Split, TaskDef, TaskInfo, TaskProgress, WorkerInfo};

// ---- Dispatcher ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHeartbeatRequest {
    pub worker_address: String,
    #[serde(default)]
    pub current_tasks: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerHeartbeatResponse {
    pub new_tasks: Vec<TaskDef>,
    pub tasks_to_delete: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerUpdateRequest {
    pub worker_address: String,
    pub updates: Vec<TaskProgress>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerUpdateResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDatasetDefRequest {
    pub dataset_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDatasetDefResponse {
    pub dataset_def: DatasetDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSplitRequest {
    pub job_id: i64,
    pub repetition: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSplitResponse {
    pub split: Option<Split>,
    pub end_of_splits: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetOrRegisterDatasetRequest {
    pub dataset: DatasetDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetOrRegisterDatasetResponse {
    pub dataset_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub dataset_id: i64,
    pub processing_mode: ProcessingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub job_client_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetOrCreateJobRequest {
    pub dataset_id: i64,
    pub processing_mode: ProcessingMode,
    pub job_name: String,
    #[serde(default)]
    pub job_name_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetOrCreateJobResponse {
    pub job_client_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseJobClientRequest {
    pub job_client_id: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReleaseJobClientResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetTasksRequest {
    pub job_client_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetTasksResponse {
    pub task_info: Vec<TaskInfo>,
    pub job_finished: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetWorkersRequest {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetWorkersResponse {
    pub workers: Vec<WorkerInfo>,
}

// ---- Worker ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTaskRequest {
    pub task: TaskDef,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessTaskResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetElementRequest {
    pub task_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetElementResponse {
    pub element: Option<Element>,
    pub end_of_sequence: bool,
}

impl GetElementResponse {
    pub fn end_of_sequence() -> Self {
        Self {
            element: None,
            end_of_sequence: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetWorkerTasksRequest {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GetWorkerTasksResponse {
    pub tasks: Vec<TaskInfo>,
}
