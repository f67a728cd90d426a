use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use dataservice_core::{
    models::DatasetDef, traits::DatasetStore, DataServiceError, DataServiceResult,
};

/// 直接按路径读取数据集定义，Worker读取共享文件系统上的数据集时使用
pub async fn read_dataset_def(path: impl AsRef<Path>) -> DataServiceResult<DatasetDef> {
    let path = path.as_ref();
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DataServiceError::NotFound(format!(
                "dataset file {}",
                path.display()
            )));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&bytes)?)
}

/// 文件系统数据集存储，每个数据集一个文件 `<dir>/<key>`
#[derive(Debug, Clone)]
pub struct FileSystemDatasetStore {
    dir: PathBuf,
}

impl FileSystemDatasetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl DatasetStore for FileSystemDatasetStore {
    async fn put(&self, key: &str, dataset: &DatasetDef) -> DataServiceResult<()> {
        fs::create_dir_all(&self.dir).await?;

        // 先写临时文件再重命名，读者不会看到写了一半的定义
        let final_path = self.path_for(key);
        let temp_path = self.dir.join(format!(".{key}.tmp"));
        fs::write(&temp_path, serde_json::to_vec(dataset)?).await?;
        fs::rename(&temp_path, &final_path).await?;

        debug!("Wrote dataset {} to {}", key, final_path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> DataServiceResult<Arc<DatasetDef>> {
        Ok(Arc::new(read_dataset_def(self.path_for(key)).await?))
    }
}
