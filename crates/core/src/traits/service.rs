use std::sync::Arc;

use async_trait::async_trait;

use crate::{models::*, DataServiceResult};

/// Dispatcher RPC接口
///
/// 由进程内的Dispatcher直接实现，也由远程客户端实现，Worker和数据消费方只依赖该接口。
#[async_trait]
pub trait DispatcherService: Send + Sync {
    /// Worker心跳，返回需要新增和删除的任务
    async fn worker_heartbeat(
        &self,
        request: WorkerHeartbeatRequest,
    ) -> DataServiceResult<WorkerHeartbeatResponse>;

    /// Worker上报任务完成情况
    async fn worker_update(&self, request: WorkerUpdateRequest) -> DataServiceResult<WorkerUpdateResponse>;

    /// 读取已注册的数据集定义
    async fn get_dataset_def(
        &self,
        request: GetDatasetDefRequest,
    ) -> DataServiceResult<GetDatasetDefResponse>;

    /// 获取分布式epoch作业的下一个切片
    async fn get_split(&self, request: GetSplitRequest) -> DataServiceResult<GetSplitResponse>;

    /// 注册数据集，指纹相同时返回已有ID
    async fn get_or_register_dataset(
        &self,
        request: GetOrRegisterDatasetRequest,
    ) -> DataServiceResult<GetOrRegisterDatasetResponse>;

    /// 创建匿名作业
    async fn create_job(&self, request: CreateJobRequest) -> DataServiceResult<CreateJobResponse>;

    /// 按(name, index)获取或创建作业
    async fn get_or_create_job(
        &self,
        request: GetOrCreateJobRequest,
    ) -> DataServiceResult<GetOrCreateJobResponse>;

    /// 释放作业客户端租约
    async fn release_job_client(
        &self,
        request: ReleaseJobClientRequest,
    ) -> DataServiceResult<ReleaseJobClientResponse>;

    /// 查询作业的任务列表
    async fn get_tasks(&self, request: GetTasksRequest) -> DataServiceResult<GetTasksResponse>;

    /// 列出已注册的Worker
    async fn get_workers(&self, request: GetWorkersRequest) -> DataServiceResult<GetWorkersResponse>;
}

/// Worker RPC接口
#[async_trait]
pub trait WorkerService: Send + Sync {
    /// 接收Dispatcher下发的任务
    async fn process_task(&self, request: ProcessTaskRequest) -> DataServiceResult<ProcessTaskResponse>;

    /// 读取任务的下一个元素
    async fn get_element(&self, request: GetElementRequest) -> DataServiceResult<GetElementResponse>;

    /// 列出本地任务
    async fn get_worker_tasks(
        &self,
        request: GetWorkerTasksRequest,
    ) -> DataServiceResult<GetWorkerTasksResponse>;
}

/// 按地址创建Worker客户端
#[async_trait]
pub trait WorkerClientFactory: Send + Sync {
    async fn create_worker_client(&self, address: &str) -> DataServiceResult<Arc<dyn WorkerService>>;
}
