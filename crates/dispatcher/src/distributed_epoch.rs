use std::collections::HashMap;

use dataservice_core::traits::SplitProvider;

/// 分布式epoch作业的切片状态
///
/// 不写入日志。Dispatcher重启后按作业重新构建，切片进度从头开始。
pub struct DistributedEpochJob {
    pub job_id: i64,
    pub dataset_id: i64,
    /// repetition -> 切片来源，Worker第一次请求某个repetition时创建
    split_providers: HashMap<i64, Box<dyn SplitProvider>>,
}

impl DistributedEpochJob {
    pub fn new(job_id: i64, dataset_id: i64) -> Self {
        Self {
            job_id,
            dataset_id,
            split_providers: HashMap::new(),
        }
    }

    pub fn split_provider(&mut self, repetition: i64) -> Option<&mut Box<dyn SplitProvider>> {
        self.split_providers.get_mut(&repetition)
    }

    pub fn insert_split_provider(
        &mut self,
        repetition: i64,
        split_provider: Box<dyn SplitProvider>,
    ) -> &mut Box<dyn SplitProvider> {
        self.split_providers.entry(repetition).or_insert(split_provider)
    }

    pub fn num_repetitions(&self) -> usize {
        self.split_providers.len()
    }
}
