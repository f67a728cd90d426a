use std::sync::Arc;

use async_trait::async_trait;

use crate::{models::DatasetDef, DataServiceResult};

/// 数据集定义存储
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// 写入数据集定义
    async fn put(&self, key: &str, dataset: &DatasetDef) -> DataServiceResult<()>;

    /// 读取数据集定义，不存在时返回NotFound
    async fn get(&self, key: &str) -> DataServiceResult<Arc<DatasetDef>>;
}
