use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use dataservice_core::traits::{DispatcherService, WorkerService};

use crate::handlers::{dispatcher, health::health_check, worker};
use crate::middleware::{request_logging, trace_layer};

/// RPC路径，服务端路由和HTTP客户端共用
pub mod paths {
    pub const HEALTH: &str = "/health";

    pub const WORKER_HEARTBEAT: &str = "/api/v1/dispatcher/worker_heartbeat";
    pub const WORKER_UPDATE: &str = "/api/v1/dispatcher/worker_update";
    pub const GET_DATASET_DEF: &str = "/api/v1/dispatcher/get_dataset_def";
    pub const GET_SPLIT: &str = "/api/v1/dispatcher/get_split";
    pub const GET_OR_REGISTER_DATASET: &str = "/api/v1/dispatcher/get_or_register_dataset";
    pub const CREATE_JOB: &str = "/api/v1/dispatcher/create_job";
    pub const GET_OR_CREATE_JOB: &str = "/api/v1/dispatcher/get_or_create_job";
    pub const RELEASE_JOB_CLIENT: &str = "/api/v1/dispatcher/release_job_client";
    pub const GET_TASKS: &str = "/api/v1/dispatcher/get_tasks";
    pub const GET_WORKERS: &str = "/api/v1/dispatcher/get_workers";

    pub const PROCESS_TASK: &str = "/api/v1/worker/process_task";
    pub const GET_ELEMENT: &str = "/api/v1/worker/get_element";
    pub const GET_WORKER_TASKS: &str = "/api/v1/worker/get_worker_tasks";
}

/// Dispatcher的HTTP路由
pub fn dispatcher_routes(service: Arc<dyn DispatcherService>) -> Router {
    Router::new()
        .route(paths::HEALTH, get(health_check))
        .route(paths::WORKER_HEARTBEAT, post(dispatcher::worker_heartbeat))
        .route(paths::WORKER_UPDATE, post(dispatcher::worker_update))
        .route(paths::GET_DATASET_DEF, post(dispatcher::get_dataset_def))
        .route(paths::GET_SPLIT, post(dispatcher::get_split))
        .route(
            paths::GET_OR_REGISTER_DATASET,
            post(dispatcher::get_or_register_dataset),
        )
        .route(paths::CREATE_JOB, post(dispatcher::create_job))
        .route(paths::GET_OR_CREATE_JOB, post(dispatcher::get_or_create_job))
        .route(paths::RELEASE_JOB_CLIENT, post(dispatcher::release_job_client))
        .route(paths::GET_TASKS, post(dispatcher::get_tasks))
        .route(paths::GET_WORKERS, post(dispatcher::get_workers))
        .with_state(service)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer())
}

/// Worker的HTTP路由
pub fn worker_routes(service: Arc<dyn WorkerService>) -> Router {
    Router::new()
        .route(paths::HEALTH, get(health_check))
        .route(paths::PROCESS_TASK, post(worker::process_task))
        .route(paths::GET_ELEMENT, post(worker::get_element))
        .route(paths::GET_WORKER_TASKS, post(worker::get_worker_tasks))
        .with_state(service)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer())
}
