use async_trait::async_trait;

use crate::{
    models::{DatasetDef, Element, Split},
    DataServiceResult,
};

/// 切片枚举器，按顺序产出一个repetition内的所有切片
#[async_trait]
pub trait SplitProvider: Send {
    /// 返回下一个切片，`None`表示切片已耗尽
    async fn get_next(&mut self) -> DataServiceResult<Option<Split>>;

    /// 重置到起点
    async fn reset(&mut self) -> DataServiceResult<()>;
}

/// 数据集迭代器
#[async_trait]
pub trait DatasetIterator: Send {
    /// 返回下一个元素，`None`表示序列结束
    async fn get_next(&mut self) -> DataServiceResult<Option<Element>>;
}

/// 数据集执行引擎
pub trait DatasetEngine: Send + Sync {
    fn make_split_provider(&self, dataset: &DatasetDef) -> DataServiceResult<Box<dyn SplitProvider>>;

    /// 构建迭代器；提供了切片来源时只处理拿到的切片
    fn make_iterator(
        &self,
        dataset: &DatasetDef,
        split_provider: Option<Box<dyn SplitProvider>>,
    ) -> DataServiceResult<Box<dyn DatasetIterator>>;
}
