//! 内置的range数据集执行引擎
//!
//! 图中包含一个 `RangeDataset` 节点（整数属性 `start`、`stop`、`step`）时产出对应的整数序列。
//! 每个元素就是一个切片，分布式epoch模式下迭代器只产出拿到的切片。

use async_trait::async_trait;
use serde_json::json;

use dataservice_core::{
    models::{AttrValue, DatasetDef, Element, GraphDef, NodeDef, Split},
    traits::{DatasetEngine, DatasetIterator, SplitProvider},
    DataServiceError, DataServiceResult,
};

pub const RANGE_DATASET_OP: &str = "RangeDataset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeSpec {
    start: i64,
    stop: i64,
    step: i64,
}

impl RangeSpec {
    fn from_dataset(dataset: &DatasetDef) -> DataServiceResult<Self> {
        let node = dataset
            .graph
            .nodes
            .iter()
            .find(|node| node.op == RANGE_DATASET_OP)
            .ok_or_else(|| {
                DataServiceError::InvalidArgument(format!(
                    "数据集图中没有 {RANGE_DATASET_OP} 节点"
                ))
            })?;

        let int_attr = |key: &str| -> DataServiceResult<Option<i64>> {
            match node.attr(key) {
                None => Ok(None),
                Some(value) => value.as_int().map(Some).ok_or_else(|| {
                    DataServiceError::InvalidArgument(format!(
                        "{} 节点的属性 {key} 必须是整数",
                        node.name
                    ))
                }),
            }
        };

        let start = int_attr("start")?.unwrap_or(0);
        let stop = int_attr("stop")?.ok_or_else(|| {
            DataServiceError::InvalidArgument(format!("{} 节点缺少属性 stop", node.name))
        })?;
        let step = int_attr("step")?.unwrap_or(1);
        if step == 0 {
            return Err(DataServiceError::InvalidArgument(
                "step不能为0".to_string(),
            ));
        }

        Ok(Self { start, stop, step })
    }

    fn contains(&self, value: i64) -> bool {
        if self.step > 0 {
            value < self.stop
        } else {
            value > self.stop
        }
    }
}

/// 按顺序产出range中的每个值作为切片
#[derive(Debug)]
pub struct RangeSplitProvider {
    spec: RangeSpec,
    next: i64,
}

impl RangeSplitProvider {
    fn new(spec: RangeSpec) -> Self {
        Self {
            spec,
            next: spec.start,
        }
    }
}

#[async_trait]
impl SplitProvider for RangeSplitProvider {
    async fn get_next(&mut self) -> DataServiceResult<Option<Split>> {
        if !self.spec.contains(self.next) {
            return Ok(None);
        }
        let value = self.next;
        self.next = self.next.saturating_add(self.spec.step);
        Ok(Some(json!(value)))
    }

    async fn reset(&mut self) -> DataServiceResult<()> {
        self.next = self.spec.start;
        Ok(())
    }
}

/// 把切片来源的每个切片当作一个元素产出
pub struct SplitDrivenIterator {
    split_provider: Box<dyn SplitProvider>,
}

#[async_trait]
impl DatasetIterator for SplitDrivenIterator {
    async fn get_next(&mut self) -> DataServiceResult<Option<Element>> {
        self.split_provider.get_next().await
    }
}

#[derive(Debug, Default, Clone)]
pub struct RangeDatasetEngine;

impl RangeDatasetEngine {
    pub fn new() -> Self {
        Self
    }

    /// 构造一个range数据集定义
    pub fn dataset_def(start: i64, stop: i64, step: i64) -> DatasetDef {
        DatasetDef::new(GraphDef {
            nodes: vec![NodeDef::new("range", RANGE_DATASET_OP)
                .with_attr("start", AttrValue::Int(start))
                .with_attr("stop", AttrValue::Int(stop))
                .with_attr("step", AttrValue::Int(step))],
            ..Default::default()
        })
    }
}

impl DatasetEngine for RangeDatasetEngine {
    fn make_split_provider(&self, dataset: &DatasetDef) -> DataServiceResult<Box<dyn SplitProvider>> {
        Ok(Box::new(RangeSplitProvider::new(RangeSpec::from_dataset(dataset)?)))
    }

    fn make_iterator(
        &self,
        dataset: &DatasetDef,
        split_provider: Option<Box<dyn SplitProvider>>,
    ) -> DataServiceResult<Box<dyn DatasetIterator>> {
        let spec = RangeSpec::from_dataset(dataset)?;
        let split_provider: Box<dyn SplitProvider> = match split_provider {
            Some(split_provider) => split_provider,
            None => Box::new(RangeSplitProvider::new(spec)),
        };
        Ok(Box::new(SplitDrivenIterator { split_provider }))
    }
}
