use serde::{Deserialize, Serialize};

use dataservice_core::models::ProcessingMode;

/// 数据集存储中的键，由ID和指纹唯一确定
pub fn dataset_key(dataset_id: i64, fingerprint: u64) -> String {
    format!("id_{dataset_id}_fp_{fingerprint}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: i64,
    pub fingerprint: u64,
}

impl Dataset {
    pub fn key(&self) -> String {
        dataset_key(self.dataset_id, self.fingerprint)
    }
}

/// 具名作业的键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamedJobKey {
    pub name: String,
    pub index: i64,
}

impl NamedJobKey {
    pub fn new(name: impl Into<String>, index: i64) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }
}

impl std::fmt::Display for NamedJobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: i64,
    pub dataset_id: i64,
    pub processing_mode: ProcessingMode,
    pub named_job_key: Option<NamedJobKey>,
    pub num_clients: i64,
    /// -1 表示从未有客户端释放过
    pub last_client_released_micros: i64,
    pub finished: bool,
}

impl Job {
    pub fn new(
        job_id: i64,
        dataset_id: i64,
        processing_mode: ProcessingMode,
        named_job_key: Option<NamedJobKey>,
    ) -> Self {
        Self {
            job_id,
            dataset_id,
            processing_mode,
            named_job_key,
            num_clients: 0,
            last_client_released_micros: -1,
            finished: false,
        }
    }

    /// 是否可以在 `now_micros` 时刻被回收
    pub fn is_gc_eligible(&self, now_micros: i64, gc_timeout_micros: i64) -> bool {
        !self.finished
            && self.num_clients == 0
            && self.last_client_released_micros >= 0
            && now_micros >= self.last_client_released_micros.saturating_add(gc_timeout_micros)
    }

    /// 创建过程中途失败、从未获得过客户端的作业
    ///
    /// 创建作业和获取第一个客户端在同一次持锁中完成，只有中途写日志失败或崩溃才会留下这种作业。
    pub fn is_abandoned(&self) -> bool {
        !self.finished && self.num_clients == 0 && self.last_client_released_micros < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub job_id: i64,
    pub dataset_id: i64,
    pub processing_mode: ProcessingMode,
    pub worker_address: String,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub address: String,
}
