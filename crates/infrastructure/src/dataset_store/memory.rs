use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dataservice_core::{
    models::DatasetDef, traits::DatasetStore, DataServiceError, DataServiceResult,
};

/// 内存数据集存储，进程退出后内容丢失
#[derive(Debug, Default)]
pub struct MemoryDatasetStore {
    datasets: RwLock<HashMap<String, Arc<DatasetDef>>>,
}

impl MemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasetStore for MemoryDatasetStore {
    async fn put(&self, key: &str, dataset: &DatasetDef) -> DataServiceResult<()> {
        self.datasets
            .write()
            .await
            .insert(key.to_string(), Arc::new(dataset.clone()));
        Ok(())
    }

    async fn get(&self, key: &str) -> DataServiceResult<Arc<DatasetDef>> {
        self.datasets
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| DataServiceError::NotFound(format!("dataset key {key}")))
    }
}
