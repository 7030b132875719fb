//! 同步集合 - 去重的文件记录序列，负责批量存在性检查与传输分发

use crate::config::TransferConfig;
use crate::core::pool::TransferPool;
use crate::core::record::FileRecord;
use crate::error::{Result, SyncError};
use crate::gateway::{
    GatewayFactory, QuerySpecifier, RemoteGateway, SharedGateway, SubmissionSpecifier,
};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 每次存在性查询的默认文件数
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// 删除选择器
#[derive(Debug, Clone)]
pub enum Selector {
    Index(usize),
    Range(Range<usize>),
    Record(FileRecord),
    /// 只删除第一个同名记录
    Name(String),
    Many(Vec<Selector>),
}

impl From<usize> for Selector {
    fn from(i: usize) -> Self {
        Selector::Index(i)
    }
}

impl From<Range<usize>> for Selector {
    fn from(r: Range<usize>) -> Self {
        Selector::Range(r)
    }
}

impl From<FileRecord> for Selector {
    fn from(r: FileRecord) -> Self {
        Selector::Record(r)
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Name(name.to_string())
    }
}

impl From<Vec<Selector>> for Selector {
    fn from(v: Vec<Selector>) -> Self {
        Selector::Many(v)
    }
}

/// 被 `add_all` 拒绝的记录
#[derive(Debug, Clone)]
pub struct Rejected {
    pub record: FileRecord,
    pub reason: String,
}

/// 传输失败的记录及原因
#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub record: FileRecord,
    pub message: String,
}

/// 去重的文件记录集合
#[derive(Clone)]
pub struct SyncSet {
    gateway: Arc<dyn RemoteGateway>,
    records: Vec<FileRecord>,
}

impl SyncSet {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            gateway,
            records: Vec::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }

    pub fn get(&self, index: usize) -> Option<&FileRecord> {
        self.records.get(index)
    }

    pub fn contains(&self, record: &FileRecord) -> bool {
        self.records.contains(record)
    }

    /// 所有同名记录
    pub fn named(&self, name: &str) -> Result<Vec<&FileRecord>> {
        let found: Vec<_> = self.records.iter().filter(|r| r.name() == name).collect();
        if found.is_empty() {
            return Err(SyncError::FileMissing(format!("集合中没有文件: {}", name)));
        }
        Ok(found)
    }

    /// 按文件名排序后的记录
    pub fn sorted(&self) -> Vec<&FileRecord> {
        let mut sorted: Vec<_> = self.records.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));
        sorted
    }

    /// 添加单个记录；无效或重复时报错
    pub fn add(&mut self, record: FileRecord) -> Result<()> {
        if let Some(reason) = self.rejection_reason(&record) {
            return Err(SyncError::FileInvalid(format!("{}: {}", record.name(), reason)));
        }
        debug!("添加文件到集合: {}", record);
        self.records.push(record);
        Ok(())
    }

    /// 批量添加，返回被拒绝的记录而不是整体失败
    pub fn add_all(&mut self, records: impl IntoIterator<Item = FileRecord>) -> Vec<Rejected> {
        let mut rejected = Vec::new();
        for record in records {
            match self.rejection_reason(&record) {
                Some(reason) => rejected.push(Rejected {
                    record,
                    reason: reason.to_string(),
                }),
                None => self.records.push(record),
            }
        }

        if !rejected.is_empty() {
            warn!("{} 个无效或重复的文件未加入集合", rejected.len());
        }
        rejected
    }

    /// 合并另一个集合并去重
    pub fn extend(&mut self, other: &SyncSet) {
        debug!("合并文件集合: {}", other);
        self.records.extend(other.records.iter().cloned());
        self.remove_duplicates();
    }

    /// 按索引、范围、记录、文件名或它们的列表删除
    pub fn remove(&mut self, selector: impl Into<Selector>) -> Result<()> {
        match selector.into() {
            Selector::Index(i) => {
                if i < self.records.len() {
                    debug!("移除索引 {} 的文件: {}", i, self.records[i]);
                    self.records.remove(i);
                }
            }
            Selector::Range(range) => {
                let end = range.end.min(self.records.len());
                let start = range.start.min(end);
                debug!("移除索引范围 {}..{}", start, end);
                self.records.drain(start..end);
            }
            Selector::Record(record) => {
                let pos = self
                    .records
                    .iter()
                    .position(|r| *r == record)
                    .ok_or_else(|| SyncError::FileMissing(format!("集合中没有文件: {}", record)))?;
                self.records.remove(pos);
            }
            Selector::Name(name) => {
                let pos = self
                    .records
                    .iter()
                    .position(|r| r.name() == name)
                    .ok_or_else(|| SyncError::FileMissing(format!("集合中没有文件: {}", name)))?;
                debug!("移除第一个名为 {} 的文件", name);
                self.records.remove(pos);
            }
            Selector::Many(selectors) => {
                for selector in selectors {
                    self.remove(selector)?;
                }
            }
        }
        Ok(())
    }

    /// 删除所有同名记录，返回删除数量
    pub fn remove_named(&mut self, name: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.name() != name);
        before - self.records.len()
    }

    pub fn query_specifiers(&self) -> Result<Vec<QuerySpecifier>> {
        self.records.iter().map(FileRecord::query_specifier).collect()
    }

    pub fn submission_specifiers(&self) -> Result<Vec<SubmissionSpecifier>> {
        self.records
            .iter()
            .map(FileRecord::submission_specifier)
            .collect()
    }

    /// 分批查询远程，返回仍需上传的记录；不修改自身
    ///
    /// 任一批次失败立即返回错误，之前批次的匹配结果全部丢弃。
    pub async fn check_remote_existence(&self, batch_size: usize) -> Result<SyncSet> {
        let batch_size = batch_size.max(1);
        let mut pending = self.clone();
        let specs = self.query_specifiers()?;
        debug!("文件集合查询条件: {:?}", specs);

        for batch in specs.chunks(batch_size) {
            info!("检查 {} 个文件是否已上传", batch.len());

            let found = self.gateway.query_files(batch).await?;
            info!("{}/{} 个文件已上传过", found.len(), batch.len());

            for desc in &found {
                let remote = FileRecord::from_descriptor(desc);
                pending.records.retain_mut(|r| {
                    !(r.name() == remote.name() && r.compare_last_modified(&remote))
                });
            }
        }

        debug!("仍需上传的文件: {}", pending);
        Ok(pending)
    }

    /// 上传集合中的文件，返回失败列表；空列表表示全部成功
    pub async fn upload(&self, force: bool, workers: usize) -> Result<Vec<TransferFailure>> {
        let config = TransferConfig {
            force,
            workers,
            ..TransferConfig::default()
        };
        let factory = Arc::new(SharedGateway(self.gateway.clone()));
        self.upload_with(&config, factory).await
    }

    /// 按传输配置上传；并行时每个工作者通过 `factory` 获取自己的网关
    pub async fn upload_with(
        &self,
        config: &TransferConfig,
        factory: Arc<dyn GatewayFactory>,
    ) -> Result<Vec<TransferFailure>> {
        let work = if config.force {
            debug!("忽略远程状态，强制上传全部文件");
            self.records.clone()
        } else {
            info!("检查集合中的文件是否已存在于远程");
            self.check_remote_existence(config.batch_size).await?.records
        };

        let workers = config.effective_workers();
        if workers < 2 {
            return Ok(self.upload_sequential(work).await);
        }
        Ok(Self::upload_parallel(work, workers, factory).await)
    }

    async fn upload_sequential(&self, work: Vec<FileRecord>) -> Vec<TransferFailure> {
        let mut failed = Vec::new();
        for mut record in work {
            debug!("准备上传文件: {}", record);
            if let Err(e) = record.upload(self.gateway.as_ref(), true).await {
                warn!("上传失败 {}: {}", record, e);
                failed.push(TransferFailure {
                    message: e.to_string(),
                    record,
                });
            }
        }
        failed
    }

    async fn upload_parallel(
        work: Vec<FileRecord>,
        workers: usize,
        factory: Arc<dyn GatewayFactory>,
    ) -> Vec<TransferFailure> {
        let mut pool = TransferPool::new(workers, factory);
        debug!("创建 {} 个并行上传工作者", pool.size());

        let mut failed = Vec::new();
        for range in chunk_ranges(work.len(), workers) {
            let chunk = work[range.clone()].to_vec();
            debug!(
                "分发上传: {}",
                chunk.iter().map(|r| r.name()).collect::<Vec<_>>().join(", ")
            );

            match pool.run_chunk(chunk).await {
                Ok(outcomes) => failed.extend(
                    outcomes
                        .into_iter()
                        .filter(|o| !o.succeeded)
                        .map(|o| TransferFailure {
                            record: o.record,
                            message: o.message,
                        }),
                ),
                Err(e) => {
                    // 已完成批次的结果保留，本批及之后的记录全部记为失败
                    error!("并行上传异常: {}", e);
                    let message = e.to_string();
                    failed.extend(work[range.start..].iter().cloned().map(|record| {
                        TransferFailure {
                            record,
                            message: message.clone(),
                        }
                    }));
                    break;
                }
            }
        }

        pool.shutdown().await;
        failed
    }

    /// 逐个下载集合中的文件，返回失败列表
    pub async fn download(&self, target_dir: &Path, overwrite: bool) -> Vec<TransferFailure> {
        let mut failed = Vec::new();
        for record in &self.records {
            let mut record = record.clone();
            if let Err(e) = record
                .download(self.gateway.as_ref(), target_dir, overwrite)
                .await
            {
                warn!("下载失败 {}: {}", record, e);
                failed.push(TransferFailure {
                    message: e.to_string(),
                    record,
                });
            }
        }
        failed
    }

    fn rejection_reason(&self, record: &FileRecord) -> Option<&'static str> {
        if record.name().is_empty() {
            Some("文件名为空")
        } else if self.records.contains(record) {
            Some("文件已在集合中")
        } else {
            None
        }
    }

    fn remove_duplicates(&mut self) {
        let mut cleaned: Vec<FileRecord> = Vec::with_capacity(self.records.len());
        for record in self.records.drain(..) {
            if !cleaned.contains(&record) {
                cleaned.push(record);
            }
        }
        self.records = cleaned;
    }
}

/// 将 `len` 个记录按 `size` 切成连续的批次
pub fn chunk_ranges(len: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

impl<'a> IntoIterator for &'a SyncSet {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl fmt::Display for SyncSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.records.iter().map(|r| r.name()).collect();
        write!(f, "{:?}", names)
    }
}

impl fmt::Debug for SyncSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSet")
            .field("gateway", &self.gateway.name())
            .field("records", &self.records)
            .finish()
    }
}
