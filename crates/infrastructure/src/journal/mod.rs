//! 状态变更日志
//!
//! 所有状态变更在生效前先写入日志，Dispatcher重启时按写入顺序重放。

mod file;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dataservice_core::DataServiceResult;
use dataservice_domain::Update;

pub use file::{FileJournalReader, FileJournalWriter};

pub const JOURNAL_DIR_NAME: &str = "tf_data_dispatcher_journal";

/// `<work_dir>/tf_data_dispatcher_journal`
pub fn journal_dir(work_dir: impl AsRef<Path>) -> PathBuf {
    work_dir.as_ref().join(JOURNAL_DIR_NAME)
}

#[async_trait]
pub trait JournalWriter: Send + Sync {
    /// 提前创建目录和日志文件，使启动阶段就能暴露IO问题
    async fn ensure_initialized(&mut self) -> DataServiceResult<()>;

    /// 持久化写入一条记录，返回成功后记录已落盘
    async fn write(&mut self, update: &Update) -> DataServiceResult<()>;
}

#[async_trait]
pub trait JournalReader: Send {
    /// 按写入顺序读取下一条记录，`None` 表示日志结束；日志目录不存在时返回NotFound
    async fn read(&mut self) -> DataServiceResult<Option<Update>>;
}
