//! 文件管理器 - 创建记录与集合，按传输配置执行上传/下载

use crate::config::{RemoteConfig, RemoteType, TransferConfig};
use crate::core::{FileRecord, SyncSet, TransferFailure};
use crate::error::{Result, SyncError};
use crate::gateway::{create_gateway, GatewayFactory, QuerySpecifier, RemoteGateway, SharedGateway};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct FileManager {
    gateway: Arc<dyn RemoteGateway>,
    config: TransferConfig,
    factory: Arc<dyn GatewayFactory>,
}

impl FileManager {
    /// 所有工作者共用 `gateway`
    pub fn new(gateway: Arc<dyn RemoteGateway>, config: TransferConfig) -> Self {
        let factory = Arc::new(SharedGateway(gateway.clone()));
        Self {
            gateway,
            config,
            factory,
        }
    }

    /// 替换并行上传时使用的网关工厂
    pub fn with_factory(mut self, factory: Arc<dyn GatewayFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// 按远程配置连接；并行上传时每个工作者各自建立连接
    pub async fn from_config(remote: RemoteConfig, config: TransferConfig) -> anyhow::Result<Self> {
        let gateway = create_gateway(&remote).await?;
        let manager = Self::new(gateway, config);

        // 内存存储每次连接都是新实例，只能共享
        if remote.typ == RemoteType::Memory {
            return Ok(manager);
        }
        Ok(manager.with_factory(Arc::new(remote)))
    }

    /// 从配置目录读取 `remote` 与 `transfer` 配置段
    pub async fn from_config_dir(config_dir: &Path) -> anyhow::Result<Self> {
        let remote = RemoteConfig::load(config_dir)
            .ok_or_else(|| anyhow::anyhow!("未配置远程存储: {:?}", config_dir))?;
        let config = TransferConfig::load(config_dir);
        Self::from_config(remote, config).await
    }

    pub fn gateway(&self) -> &Arc<dyn RemoteGateway> {
        &self.gateway
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn create_file(&self, path: impl AsRef<Path>) -> FileRecord {
        FileRecord::from_path(path)
    }

    /// 创建集合；重复或无效的记录会被丢弃并记录警告
    pub fn create_file_set(&self, records: impl IntoIterator<Item = FileRecord>) -> SyncSet {
        let mut set = SyncSet::new(self.gateway.clone());
        let rejected = set.add_all(records);
        if !rejected.is_empty() {
            debug!("创建集合时丢弃了 {} 个记录", rejected.len());
        }
        set
    }

    /// 扫描目录中文件名匹配 `pattern` 的文件
    pub async fn files_from_dir(
        &self,
        dir: impl AsRef<Path>,
        recursive: bool,
        pattern: &str,
    ) -> Result<SyncSet> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(SyncError::FileInvalid(format!("不是有效目录: {:?}", dir)));
        }
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| SyncError::FileInvalid(format!("无效的匹配模式 {:?}: {}", pattern, e)))?;

        info!("扫描目录 {:?} (递归: {}, 模式: {})", dir, recursive, pattern);

        // 计算校验和会读文件，放到阻塞线程
        let records = tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&dir)
                .follow_links(false)
                .min_depth(1)
                .sort_by_file_name();
            let walker = if recursive { walker } else { walker.max_depth(1) };

            walker
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("跳过无法读取的目录项: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| matcher.matches(&entry.file_name().to_string_lossy()))
                .map(|entry| FileRecord::from_path(entry.path()))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| SyncError::io("扫描目录", std::io::Error::other(e)))?;

        debug!("扫描到 {} 个文件", records.len());
        Ok(self.create_file_set(records))
    }

    /// 按名称、修改时间（以及可选的原始路径）查询远程文件
    pub async fn find_file(
        &self,
        name: &str,
        last_modified: &str,
        original_path: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let spec = QuerySpecifier {
            file_name: name.to_string(),
            timestamp: last_modified.to_string(),
            original_path: original_path.map(str::to_string),
        };
        let found = self.gateway.query_files(std::slice::from_ref(&spec)).await?;
        Ok(found.iter().map(FileRecord::from_descriptor).collect())
    }

    /// 按配置的批大小、强制标志与并行数上传
    pub async fn upload(&self, set: &SyncSet) -> Result<Vec<TransferFailure>> {
        let failed = set.upload_with(&self.config, self.factory.clone()).await?;
        if failed.is_empty() {
            info!("上传完成: {} 个文件", set.len());
        } else {
            warn!("上传完成，{} 个文件失败", failed.len());
        }
        Ok(failed)
    }

    /// 下载到 `target_dir`，是否覆盖由配置决定
    pub async fn download(&self, set: &SyncSet, target_dir: &Path) -> Vec<TransferFailure> {
        set.download(target_dir, self.config.overwrite).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;

    fn manager(gateway: Arc<MockGateway>, config: TransferConfig) -> FileManager {
        FileManager::new(gateway, config)
    }

    #[tokio::test]
    async fn test_files_from_dir_filters_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.png"), b"c").unwrap();

        let fm = manager(Arc::new(MockGateway::new()), TransferConfig::default());

        let flat = fm.files_from_dir(dir.path(), false, "*.png").await.unwrap();
        let names: Vec<_> = flat.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["a.png"]);

        let deep = fm.files_from_dir(dir.path(), true, "*.png").await.unwrap();
        let names: Vec<_> = deep.sorted().iter().map(|r| r.name()).collect();
        assert_eq!(names, ["a.png", "c.png"]);

        let all = fm.files_from_dir(dir.path(), true, "*").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_files_from_dir_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        let fm = manager(Arc::new(MockGateway::new()), TransferConfig::default());

        let err = fm.files_from_dir(&file, false, "*").await.unwrap_err();
        assert!(matches!(err, SyncError::FileInvalid(_)));

        let err = fm.files_from_dir(dir.path(), false, "[").await.unwrap_err();
        assert!(matches!(err, SyncError::FileInvalid(_)));
    }

    #[tokio::test]
    async fn test_create_file_set_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"same").unwrap();
        let fm = manager(Arc::new(MockGateway::new()), TransferConfig::default());

        let set = fm.create_file_set(vec![fm.create_file(&path), fm.create_file(&path)]);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_find_file_queries_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"x").unwrap();
        let gateway = Arc::new(MockGateway::new());
        let fm = manager(gateway.clone(), TransferConfig::default());
        let record = fm.create_file(&path);
        gateway.mark_present(&record);

        let found = fm.find_file("a.txt", record.last_modified(), None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "a.txt");

        let missing = fm.find_file("a.txt", "1999-01-01T00:00:00Z", None).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_upload_uses_configured_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{}.bin", i)), [i as u8]).unwrap();
        }
        let gateway = Arc::new(MockGateway::new());
        let config = TransferConfig {
            batch_size: 2,
            ..TransferConfig::default()
        };
        let fm = manager(gateway.clone(), config);

        let set = fm.files_from_dir(dir.path(), false, "*.bin").await.unwrap();
        let failed = fm.upload(&set).await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(gateway.query_batches(), [2, 2, 1]);
        assert_eq!(gateway.sent().len(), 5);
    }

    #[tokio::test]
    async fn test_from_config_dir_requires_remote() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileManager::from_config_dir(dir.path()).await.is_err());

        RemoteConfig::memory().save(dir.path()).unwrap();
        let fm = FileManager::from_config_dir(dir.path()).await.unwrap();
        assert_eq!(fm.gateway().name(), "memory");
        assert_eq!(fm.config().batch_size, 50);
    }
}
