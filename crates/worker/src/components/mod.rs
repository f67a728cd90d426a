pub mod heartbeat_manager;
pub mod task_completion;

pub use heartbeat_manager::HeartbeatManager;
pub use task_completion::TaskCompletionReporter;
