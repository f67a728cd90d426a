use std::sync::Arc;

use axum::{extract::State, Json};

use dataservice_core::{models::*, traits::WorkerService};

use crate::error::ApiError;

pub async fn process_task(
    State(worker): State<Arc<dyn WorkerService>>,
    Json(request): Json<ProcessTaskRequest>,
) -> Result<Json<ProcessTaskResponse>, ApiError> {
    Ok(Json(worker.process_task(request).await?))
}

pub async fn get_element(
    State(worker): State<Arc<dyn WorkerService>>,
    Json(request): Json<GetElementRequest>,
) -> Result<Json<GetElementResponse>, ApiError> {
    Ok(Json(worker.get_element(request).await?))
}

pub async fn get_worker_tasks(
    State(worker): State<Arc<dyn WorkerService>>,
    Json(request): Json<GetWorkerTasksRequest>,
) -> Result<Json<GetWorkerTasksResponse>, ApiError> {
    Ok(Json(worker.get_worker_tasks(request).await?))
}
