use serde::{Deserialize, Serialize};

use super::DatasetDef;
use crate::errors::DataServiceError;

/// 作业的分片处理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// 每个Worker独立处理完整数据集
    ParallelEpochs,
    /// Dispatcher统一分发切片，每个切片在一次repetition中只处理一次
    DistributedEpoch,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::ParallelEpochs => "parallel_epochs",
            ProcessingMode::DistributedEpoch => "distributed_epoch",
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingMode {
    type Err = DataServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parallel_epochs" => Ok(ProcessingMode::ParallelEpochs),
            "distributed_epoch" => Ok(ProcessingMode::DistributedEpoch),
            other => Err(DataServiceError::InvalidArgument(format!(
                "不支持的处理模式: {other}"
            ))),
        }
    }
}

/// 下发给Worker的数据集来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSource {
    /// 未配置work_dir时直接内嵌定义
    Inline(DatasetDef),
    /// 配置了work_dir时只下发共享文件系统上的路径
    Path(String),
}

/// 任务定义，Dispatcher下发给Worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub task_id: i64,
    pub job_id: i64,
    pub dataset_id: i64,
    pub processing_mode: ProcessingMode,
    pub dataset: DatasetSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub worker_address: String,
    pub task_id: i64,
    pub job_id: i64,
    #[serde(default)]
    pub finished: bool,
}

/// Worker上报的任务进度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub address: String,
}
