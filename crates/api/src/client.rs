use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use dataservice_core::{
    config::SUPPORTED_PROTOCOLS,
    models::*,
    traits::{DispatcherService, WorkerClientFactory, WorkerService},
    DataServiceError, DataServiceResult,
};

use crate::error::{error_from_status, ErrorBody};
use crate::routes::paths;

/// JSON-over-HTTP的RPC调用
#[derive(Debug, Clone)]
pub struct RpcClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RpcClient {
    pub fn new(protocol: &str, address: &str) -> DataServiceResult<Self> {
        if !SUPPORTED_PROTOCOLS.contains(&protocol) {
            return Err(DataServiceError::InvalidArgument(format!(
                "不支持的协议: {protocol}，可选值: {SUPPORTED_PROTOCOLS:?}"
            )));
        }
        Ok(Self {
            base_url: format!("{protocol}://{address}"),
            http_client: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn call<Req, Resp>(&self, path: &str, request: &Req) -> DataServiceResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| DataServiceError::Unavailable(format!("Failed to reach {url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Resp>().await.map_err(|e| {
                DataServiceError::Internal(format!("Failed to decode response from {url}: {e}"))
            });
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error_body) => Err(DataServiceError::from_code(
                error_body.error.code,
                error_body.error.message,
            )),
            Err(_) => Err(error_from_status(status, body)),
        }
    }
}

/// 远端Dispatcher的客户端
#[derive(Debug, Clone)]
pub struct HttpDispatcherClient {
    rpc: RpcClient,
}

impl HttpDispatcherClient {
    pub fn new(protocol: &str, address: &str) -> DataServiceResult<Self> {
        Ok(Self {
            rpc: RpcClient::new(protocol, address)?,
        })
    }
}

#[async_trait]
impl DispatcherService for HttpDispatcherClient {
    async fn worker_heartbeat(
        &self,
        request: WorkerHeartbeatRequest,
    ) -> DataServiceResult<WorkerHeartbeatResponse> {
        self.rpc.call(paths::WORKER_HEARTBEAT, &request).await
    }

    async fn worker_update(&self, request: WorkerUpdateRequest) -> DataServiceResult<WorkerUpdateResponse> {
        self.rpc.call(paths::WORKER_UPDATE, &request).await
    }

    async fn get_dataset_def(
        &self,
        request: GetDatasetDefRequest,
    ) -> DataServiceResult<GetDatasetDefResponse> {
        self.rpc.call(paths::GET_DATASET_DEF, &request).await
    }

    async fn get_split(&self, request: GetSplitRequest) -> DataServiceResult<GetSplitResponse> {
        self.rpc.call(paths::GET_SPLIT, &request).await
    }

    async fn get_or_register_dataset(
        &self,
        request: GetOrRegisterDatasetRequest,
    ) -> DataServiceResult<GetOrRegisterDatasetResponse> {
        self.rpc.call(paths::GET_OR_REGISTER_DATASET, &request).await
    }

    async fn create_job(&self, request: CreateJobRequest) -> DataServiceResult<CreateJobResponse> {
        self.rpc.call(paths::CREATE_JOB, &request).await
    }

    async fn get_or_create_job(
        &self,
        request: GetOrCreateJobRequest,
    ) -> DataServiceResult<GetOrCreateJobResponse> {
        self.rpc.call(paths::GET_OR_CREATE_JOB, &request).await
    }

    async fn release_job_client(
        &self,
        request: ReleaseJobClientRequest,
    ) -> DataServiceResult<ReleaseJobClientResponse> {
        self.rpc.call(paths::RELEASE_JOB_CLIENT, &request).await
    }

    async fn get_tasks(&self, request: GetTasksRequest) -> DataServiceResult<GetTasksResponse> {
        self.rpc.call(paths::GET_TASKS, &request).await
    }

    async fn get_workers(&self, request: GetWorkersRequest) -> DataServiceResult<GetWorkersResponse> {
        self.rpc.call(paths::GET_WORKERS, &request).await
    }
}

/// 远端Worker的客户端
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    rpc: RpcClient,
}

impl HttpWorkerClient {
    pub fn new(protocol: &str, address: &str) -> DataServiceResult<Self> {
        Ok(Self {
            rpc: RpcClient::new(protocol, address)?,
        })
    }
}

#[async_trait]
impl WorkerService for HttpWorkerClient {
    async fn process_task(&self, request: ProcessTaskRequest) -> DataServiceResult<ProcessTaskResponse> {
        self.rpc.call(paths::PROCESS_TASK, &request).await
    }

    async fn get_element(&self, request: GetElementRequest) -> DataServiceResult<GetElementResponse> {
        self.rpc.call(paths::GET_ELEMENT, &request).await
    }

    async fn get_worker_tasks(
        &self,
        request: GetWorkerTasksRequest,
    ) -> DataServiceResult<GetWorkerTasksResponse> {
        self.rpc.call(paths::GET_WORKER_TASKS, &request).await
    }
}

/// 按协议创建 [`HttpWorkerClient`]
#[derive(Debug, Clone)]
pub struct HttpWorkerClientFactory {
    protocol: String,
}

impl HttpWorkerClientFactory {
    pub fn new(protocol: &str) -> DataServiceResult<Self> {
        if !SUPPORTED_PROTOCOLS.contains(&protocol) {
            return Err(DataServiceError::InvalidArgument(format!(
                "不支持的协议: {protocol}，可选值: {SUPPORTED_PROTOCOLS:?}"
            )));
        }
        Ok(Self {
            protocol: protocol.to_string(),
        })
    }
}

#[async_trait]
impl WorkerClientFactory for HttpWorkerClientFactory {
    async fn create_worker_client(&self, address: &str) -> DataServiceResult<Arc<dyn WorkerService>> {
        debug!("Creating {} client for worker {}", self.protocol, address);
        Ok(Arc::new(HttpWorkerClient::new(&self.protocol, address)?))
    }
}
