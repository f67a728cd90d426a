mod filesystem;
mod memory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use dataservice_core::traits::DatasetStore;

pub use filesystem::{read_dataset_def, FileSystemDatasetStore};
pub use memory::MemoryDatasetStore;

pub const DATASETS_DIR_NAME: &str = "datasets";

/// `<work_dir>/datasets`
pub fn datasets_dir(work_dir: impl AsRef<Path>) -> PathBuf {
    work_dir.as_ref().join(DATASETS_DIR_NAME)
}

pub struct DatasetStoreFactory;

impl DatasetStoreFactory {
    /// 未配置work_dir时使用内存存储，否则使用 `<work_dir>/datasets`
    pub fn create(work_dir: &str) -> Arc<dyn DatasetStore> {
        if work_dir.is_empty() {
            info!("No work_dir configured, keeping datasets in memory");
            Arc::new(MemoryDatasetStore::new())
        } else {
            let dir = datasets_dir(work_dir);
            info!("Storing datasets under {}", dir.display());
            Arc::new(FileSystemDatasetStore::new(dir))
        }
    }
}
