//! 数据服务的HTTP传输层
//!
//! Dispatcher和Worker的RPC都以 `POST` + JSON 的形式暴露：
//!
//! - `POST /api/v1/dispatcher/<rpc>`：`worker_heartbeat`、`worker_update`、`get_dataset_def`、
//!   `get_split`、`get_or_register_dataset`、`create_job`、`get_or_create_job`、
//!   `release_job_client`、`get_tasks`、`get_workers`
//! - `POST /api/v1/worker/<rpc>`：`process_task`、`get_element`、`get_worker_tasks`
//! - `GET /health`
//!
//! 失败时返回对应的HTTP状态码和 `{"error": {"code": "NOT_FOUND", "message": "..."}}`，
//! 客户端据 `code` 还原出 [`dataservice_core::DataServiceError`]。

pub mod client;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use client::{HttpDispatcherClient, HttpWorkerClient, HttpWorkerClientFactory, RpcClient};
pub use error::{ApiError, ErrorBody};
pub use routes::{dispatcher_routes, worker_routes};
pub use server::serve;
