//! 文件记录 - 单个文件的身份（校验和、修改时间）与上传/下载

use crate::error::{Result, SyncError};
use crate::gateway::{QuerySpecifier, RemoteDescriptor, RemoteGateway, SubmissionSpecifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// 计算校验和时每次读取的块大小
pub const CHECKSUM_BLOCK_SIZE: usize = 64 * 1024;

/// 远程接口使用的时间格式（UTC，精确到秒）
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// 记录来源：本地路径或远程描述，二者互斥
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordSource {
    Local { path: PathBuf },
    Remote { original_path: String, url: String },
}

/// 用于相等判断的身份标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint<'a> {
    /// 本地已验证：按内容校验和 + 文件名
    Content { checksum: &'a str, name: &'a str },
    /// 未验证：按路径
    Path(Cow<'a, str>),
}

/// 上传结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// 远程已有相同文件
    Skipped,
}

/// 下载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { size: u64 },
    /// 远程没有匹配的文件
    NotUploaded,
}

/// 单个文件记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    name: String,
    source: RecordSource,
    exists: bool,
    last_modified: String,
    checksum: String,
}

impl FileRecord {
    /// 从本地路径创建记录；文件不存在或不可读时不会报错，只是 `exists` 为 false
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let mut record = Self::unverified(path.as_ref());
        record.exists = record.check_path();
        record.refresh();
        record
    }

    /// 同 [`FileRecord::from_path`]，但文件存在却无法读取时返回 IO 错误
    pub fn try_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut record = Self::unverified(path.as_ref());
        record.exists = record.check_path();
        record.try_refresh()?;
        Ok(record)
    }

    fn unverified(path: &Path) -> Self {
        let path = normalize_path(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name,
            source: RecordSource::Local { path },
            exists: false,
            last_modified: String::new(),
            checksum: String::new(),
        }
    }

    /// 从远程描述重建记录，不做任何本地验证
    pub fn from_descriptor(desc: &RemoteDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            source: RecordSource::Remote {
                original_path: desc.original_file_path.clone(),
                url: desc.link.href.clone(),
            },
            exists: false,
            last_modified: desc.last_modified_time.clone(),
            checksum: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &RecordSource {
        &self.source
    }

    /// 本地路径（仅本地记录）
    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            RecordSource::Local { path } => Some(path),
            RecordSource::Remote { .. } => None,
        }
    }

    /// 下载链接（仅远程记录）
    pub fn url(&self) -> Option<&str> {
        match &self.source {
            RecordSource::Local { .. } => None,
            RecordSource::Remote { url, .. } => Some(url),
        }
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// 不修改记录，直接检查本地文件当前是否还在
    pub fn is_present(&self) -> bool {
        self.local_path().is_some_and(|p| p.is_file())
    }

    pub fn last_modified(&self) -> &str {
        &self.last_modified
    }

    /// BLAKE3 校验和（十六进制），未验证时为空
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// 文件大小，未验证时为 0
    pub fn size(&self) -> u64 {
        match self.local_path() {
            Some(path) if self.exists => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            _ => 0,
        }
    }

    /// 路径字符串，用于路径级身份
    pub fn path_key(&self) -> Cow<'_, str> {
        match &self.source {
            RecordSource::Local { path } => path.to_string_lossy(),
            RecordSource::Remote { original_path, .. } => Cow::Borrowed(original_path),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint<'_> {
        if self.exists {
            Fingerprint::Content {
                checksum: &self.checksum,
                name: &self.name,
            }
        } else {
            Fingerprint::Path(self.path_key())
        }
    }

    /// 重新检查文件是否存在于磁盘
    pub fn verify_existence(&mut self) -> bool {
        let was = self.exists;
        self.exists = self.check_path();
        if self.exists != was {
            self.refresh();
        }
        self.exists
    }

    /// 按磁盘当前状态重新计算校验和与修改时间；读取失败时记录视为不存在
    pub fn refresh(&mut self) {
        if let Err(e) = self.try_refresh() {
            warn!("{}", e);
            self.exists = false;
            self.last_modified.clear();
            self.checksum.clear();
        }
    }

    fn try_refresh(&mut self) -> Result<()> {
        let path = match self.local_path() {
            Some(path) if self.exists => path.to_path_buf(),
            _ => {
                self.last_modified.clear();
                self.checksum.clear();
                return Ok(());
            }
        };

        self.last_modified = read_last_modified(&path)
            .map_err(|e| SyncError::io(format!("读取修改时间 {:?}", path), e))?;
        self.checksum =
            hash_file(&path).map_err(|e| SyncError::io(format!("计算校验和 {:?}", path), e))?;
        Ok(())
    }

    /// 从磁盘读取修改时间，未验证时返回空串
    pub fn compute_last_modified(&self) -> String {
        let path = match self.local_path() {
            Some(path) if self.exists => path,
            _ => {
                debug!("无法获取未验证文件的修改时间: {}", self.name);
                return String::new();
            }
        };

        match read_last_modified(path) {
            Ok(stamp) => stamp,
            Err(e) => {
                debug!("读取修改时间失败 {:?}: {}", path, e);
                String::new()
            }
        }
    }

    /// 刷新本记录的修改时间后与另一记录比较
    pub fn compare_last_modified(&mut self, other: &FileRecord) -> bool {
        self.last_modified = self.compute_last_modified();
        if self.last_modified.is_empty() {
            return false;
        }
        self.last_modified == other.last_modified
    }

    /// 构造存在性查询条件
    pub fn query_specifier(&self) -> Result<QuerySpecifier> {
        self.ensure_exists()?;
        Ok(QuerySpecifier {
            file_name: self.name.clone(),
            timestamp: self.last_modified.clone(),
            original_path: Some(self.windows_path()),
        })
    }

    /// 构造提交描述
    pub fn submission_specifier(&self) -> Result<SubmissionSpecifier> {
        self.ensure_exists()?;
        Ok(SubmissionSpecifier {
            name: self.name.clone(),
            timestamp: self.last_modified.clone(),
        })
    }

    /// 远程使用 Windows 风格路径
    pub fn windows_path(&self) -> String {
        self.path_key().replace('/', "\\")
    }

    /// 查找远程是否已有同名且修改时间一致的文件
    pub async fn find_remote(&mut self, gateway: &dyn RemoteGateway) -> Result<Option<FileRecord>> {
        let spec = self.query_specifier()?;
        let found = gateway.query_files(std::slice::from_ref(&spec)).await?;

        for desc in &found {
            let remote = FileRecord::from_descriptor(desc);
            if self.name == remote.name && self.compare_last_modified(&remote) {
                return Ok(Some(remote));
            }
        }
        Ok(None)
    }

    /// 上传文件；`force` 为 false 时远程已有则跳过
    pub async fn upload(&mut self, gateway: &dyn RemoteGateway, force: bool) -> Result<UploadOutcome> {
        if !force {
            info!("检查文件是否已上传: {}", self.name);
            if self.find_remote(gateway).await?.is_some() {
                info!("远程已存在，跳过: {}", self.name);
                return Ok(UploadOutcome::Skipped);
            }
        }

        info!("上传文件: {}", self.name);
        gateway.send_file(self).await?;
        Ok(UploadOutcome::Uploaded)
    }

    /// 下载文件到 `target_dir`；远程没有匹配文件时直接返回
    pub async fn download(
        &mut self,
        gateway: &dyn RemoteGateway,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<DownloadOutcome> {
        let remote = match self.find_remote(gateway).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                debug!("文件尚未上传，无法下载: {}", self.name);
                return Ok(DownloadOutcome::NotUploaded);
            }
            Err(SyncError::FileMissing(_)) => return Ok(DownloadOutcome::NotUploaded),
            Err(e) => return Err(e),
        };

        let size = gateway
            .props_file(&remote)
            .await
            .inspect_err(|e| debug!("无法获取远程文件属性 {}: {}", remote.name, e))?;

        gateway
            .get_file(&remote, size, target_dir, overwrite)
            .await
            .inspect_err(|e| debug!("下载失败 {}: {}", remote.name, e))?;

        info!("已下载 {} 到 {:?}", remote.name, target_dir);
        Ok(DownloadOutcome::Downloaded { size })
    }

    fn ensure_exists(&self) -> Result<()> {
        if !self.exists {
            return Err(SyncError::FileMissing(format!(
                "文件不存在于路径: {}",
                self.path_key()
            )));
        }
        Ok(())
    }

    fn check_path(&self) -> bool {
        let Some(path) = self.local_path() else {
            return false;
        };
        if !path.is_file() {
            warn!("无法验证文件存在: {:?}", path);
            return false;
        }
        true
    }
}

fn read_last_modified(path: &Path) -> std::io::Result<String> {
    let mtime = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(mtime)
        .format(TIMESTAMP_FORMAT)
        .to_string())
}

/// 以固定块大小流式计算文件 BLAKE3 校验和
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHECKSUM_BLOCK_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// 词法规范化路径（去掉 `.`，折叠 `..`）
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl PartialEq for FileRecord {
    fn eq(&self, other: &Self) -> bool {
        match (self.fingerprint(), other.fingerprint()) {
            (a @ Fingerprint::Content { .. }, b @ Fingerprint::Content { .. }) => a == b,
            _ => self.path_key() == other.path_key(),
        }
    }
}

impl Eq for FileRecord {}

impl Hash for FileRecord {
    // 路径键的末段：内容身份相等时即同名，路径身份相等时路径串相同
    fn hash<H: Hasher>(&self, state: &mut H) {
        let key = self.path_key();
        Path::new(&*key).file_name().hash(state);
    }
}

impl PartialOrd for FileRecord {
    // 同名但身份不同的记录不可比较
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match self.name.cmp(&other.name) {
            std::cmp::Ordering::Equal if self != other => None,
            ordering => Some(ordering),
        }
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
