//! Dispatcher：数据集注册、作业与任务管理、日志恢复和作业回收

pub mod dataset_graph;
pub mod distributed_epoch;
pub mod job_gc;
pub mod service;
pub mod test_utils;

pub use dataset_graph::{fingerprint, prepare_dataset};
pub use job_gc::JobGarbageCollector;
pub use service::Dispatcher;
