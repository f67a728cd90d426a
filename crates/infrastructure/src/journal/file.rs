use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use dataservice_core::{DataServiceError, DataServiceResult};
use dataservice_domain::Update;

use super::{JournalReader, JournalWriter};

const JOURNAL_FILE_PREFIX: &str = "journal_";

fn parse_file_index(name: &str) -> Option<u64> {
    name.strip_prefix(JOURNAL_FILE_PREFIX)?.parse().ok()
}

/// 按序号升序列出目录中的日志文件
async fn list_journal_files(dir: &Path) -> DataServiceResult<Vec<(u64, PathBuf)>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_file_index) {
            files.push((index, entry.path()));
        }
    }
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

/// 基于文件的日志写入器
///
/// 每次会话（一次Dispatcher启动）写入一个新文件 `journal_<n>`，崩溃会话残留的半行不会被续写。
/// 每条记录是一行JSON，写入后调用 `sync_data`。
pub struct FileJournalWriter {
    dir: PathBuf,
    file: Option<File>,
}

impl FileJournalWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 写入失败后回滚到 `committed_len` 并放弃当前文件
    ///
    /// 截断失败时残留的半行留在文件末尾，下一次写入会打开新文件，读取时按截断的尾部跳过。
    async fn discard_failed_write(&mut self, committed_len: u64) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.set_len(committed_len).await {
                warn!(
                    "Failed to roll back journal file in {} to {} bytes: {}",
                    self.dir.display(),
                    committed_len,
                    e
                );
            }
        }
    }
}

async fn append_record(file: &mut File, line: &[u8]) -> DataServiceResult<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

#[async_trait]
impl JournalWriter for FileJournalWriter {
    async fn ensure_initialized(&mut self) -> DataServiceResult<()> {
        if self.file.is_some() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).await?;
        let next_index = list_journal_files(&self.dir)
            .await?
            .last()
            .map(|(index, _)| index + 1)
            .unwrap_or(0);
        let path = self.dir.join(format!("{JOURNAL_FILE_PREFIX}{next_index}"));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .await?;

        info!("Opened journal file {}", path.display());
        self.file = Some(file);
        Ok(())
    }

    async fn write(&mut self, update: &Update) -> DataServiceResult<()> {
        self.ensure_initialized().await?;
        let Some(file) = self.file.as_mut() else {
            return Err(DataServiceError::Internal("日志文件未初始化".to_string()));
        };

        let mut line = serde_json::to_vec(update)?;
        line.push(b'\n');
        let committed_len = file.metadata().await?.len();
        if let Err(e) = append_record(file, &line).await {
            self.discard_failed_write(committed_len).await;
            return Err(e);
        }

        debug!("Journaled {} update", update.kind());
        Ok(())
    }
}

/// 基于文件的日志读取器，依次读取所有 `journal_<n>` 文件
pub struct FileJournalReader {
    dir: PathBuf,
    pending_files: Option<VecDeque<PathBuf>>,
    current: Option<(PathBuf, BufReader<File>)>,
}

impl FileJournalReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending_files: None,
            current: None,
        }
    }

    async fn load_file_list(&mut self) -> DataServiceResult<()> {
        if self.pending_files.is_some() {
            return Ok(());
        }
        if !fs::try_exists(&self.dir).await? {
            return Err(DataServiceError::NotFound(format!(
                "journal directory {} does not exist",
                self.dir.display()
            )));
        }

        let files = list_journal_files(&self.dir)
            .await?
            .into_iter()
            .map(|(_, path)| path)
            .collect();
        self.pending_files = Some(files);
        Ok(())
    }
}

#[async_trait]
impl JournalReader for FileJournalReader {
    async fn read(&mut self) -> DataServiceResult<Option<Update>> {
        self.load_file_list().await?;

        loop {
            if self.current.is_none() {
                let next = self.pending_files.as_mut().and_then(|files| files.pop_front());
                let Some(path) = next else {
                    return Ok(None);
                };
                let file = File::open(&path).await?;
                debug!("Reading journal file {}", path.display());
                self.current = Some((path, BufReader::new(file)));
            }

            let Some((path, reader)) = self.current.as_mut() else {
                continue;
            };

            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                self.current = None;
                continue;
            }

            let complete = line.ends_with('\n');
            let record = line.trim();
            if record.is_empty() {
                continue;
            }

            match serde_json::from_str::<Update>(record) {
                Ok(update) => return Ok(Some(update)),
                Err(e) if !complete => {
                    // 写入过程中崩溃留下的半行，只可能出现在文件末尾
                    warn!(
                        "Ignoring truncated record at end of journal file {}: {}",
                        path.display(),
                        e
                    );
                    self.current = None;
                }
                Err(e) => {
                    return Err(DataServiceError::Internal(format!(
                        "日志文件 {} 中存在无法解析的记录: {e}",
                        path.display()
                    )));
                }
            }
        }
    }
}
