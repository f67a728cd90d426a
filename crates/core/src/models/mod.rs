pub mod dataset;
pub mod rpc;
pub mod task;

pub use dataset::*;
pub use rpc::*;
pub use task::*;
