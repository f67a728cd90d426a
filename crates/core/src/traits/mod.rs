pub mod dataset_store;
pub mod engine;
pub mod service;

pub use dataset_store::DatasetStore;
pub use engine::{DatasetEngine, DatasetIterator, SplitProvider};
pub use service::{DispatcherService, WorkerClientFactory, WorkerService};
