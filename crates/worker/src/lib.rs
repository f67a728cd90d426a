pub mod components;
pub mod service;
pub mod split_provider;
pub mod task_runner;

pub use service::Worker;
pub use split_provider::DispatcherSplitProvider;
pub use task_runner::{NextElement, TaskRunner};
