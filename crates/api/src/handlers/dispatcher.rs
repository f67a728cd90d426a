use std::sync::Arc;

use axum::{extract::State, Json};

use dataservice_core::{models::*, traits::DispatcherService};

use crate::error::ApiError;

pub async fn worker_heartbeat(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, ApiError> {
    Ok(Json(dispatcher.worker_heartbeat(request).await?))
}

pub async fn worker_update(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<WorkerUpdateRequest>,
) -> Result<Json<WorkerUpdateResponse>, ApiError> {
    Ok(Json(dispatcher.worker_update(request).await?))
}

pub async fn get_dataset_def(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<GetDatasetDefRequest>,
) -> Result<Json<GetDatasetDefResponse>, ApiError> {
    Ok(Json(dispatcher.get_dataset_def(request).await?))
}

pub async fn get_split(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<GetSplitRequest>,
) -> Result<Json<GetSplitResponse>, ApiError> {
    Ok(Json(dispatcher.get_split(request).await?))
}

pub async fn get_or_register_dataset(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<GetOrRegisterDatasetRequest>,
) -> Result<Json<GetOrRegisterDatasetResponse>, ApiError> {
    Ok(Json(dispatcher.get_or_register_dataset(request).await?))
}

pub async fn create_job(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    Ok(Json(dispatcher.create_job(request).await?))
}

pub async fn get_or_create_job(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<GetOrCreateJobRequest>,
) -> Result<Json<GetOrCreateJobResponse>, ApiError> {
    Ok(Json(dispatcher.get_or_create_job(request).await?))
}

pub async fn release_job_client(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<ReleaseJobClientRequest>,
) -> Result<Json<ReleaseJobClientResponse>, ApiError> {
    Ok(Json(dispatcher.release_job_client(request).await?))
}

pub async fn get_tasks(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<GetTasksRequest>,
) -> Result<Json<GetTasksResponse>, ApiError> {
    Ok(Json(dispatcher.get_tasks(request).await?))
}

pub async fn get_workers(
    State(dispatcher): State<Arc<dyn DispatcherService>>,
    Json(request): Json<GetWorkersRequest>,
) -> Result<Json<GetWorkersResponse>, ApiError> {
    Ok(Json(dispatcher.get_workers(request).await?))
}
