//! 基于 OpenDAL 的远程存储网关
//!
//! 文件内容保存在 `files/<name>`，描述信息保存在 `meta/<name>.json`。

use super::{Link, QuerySpecifier, RemoteDescriptor, RemoteGateway, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::{RemoteConfig, RemoteType};
use crate::core::FileRecord;
use crate::error::{RemoteCallError, RemoteErrorKind};
use anyhow::Result;
use async_trait::async_trait;
use opendal::{layers::TimeoutLayer, Operator};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// 上传/下载时每块的大小
pub const TRANSFER_BLOCK_SIZE: usize = 1024 * 1024;

const FILES_PREFIX: &str = "files/";
const META_PREFIX: &str = "meta/";

pub struct StoreGateway {
    operator: Operator,
    name: String,
}

impl StoreGateway {
    pub fn new(operator: Operator, name: impl Into<String>) -> Self {
        Self {
            operator,
            name: name.into(),
        }
    }

    /// 根据配置构建对应的 OpenDAL 服务
    pub async fn from_config(config: &RemoteConfig) -> Result<Self> {
        let timeout = TimeoutLayer::default()
            .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS));

        match config.typ {
            RemoteType::Local => {
                let path = config
                    .path
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("Local remote requires path"))?;
                std::fs::create_dir_all(path)?;
                let builder = opendal::services::Fs::default().root(path);
                let operator = Operator::new(builder)?.finish();
                Ok(Self::new(operator, format!("local:{}", path)))
            }
            RemoteType::S3 => {
                let bucket = config
                    .bucket
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("S3 remote requires bucket"))?;
                let region = config
                    .region
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("S3 remote requires region"))?;
                let access_key = config
                    .access_key
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("S3 remote requires accessKey"))?;
                let secret_key = config
                    .secret_key
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("S3 remote requires secretKey"))?;

                let mut builder = opendal::services::S3::default()
                    .bucket(bucket)
                    .region(region)
                    .access_key_id(access_key)
                    .secret_access_key(secret_key);
                if let Some(ref ep) = config.endpoint {
                    builder = builder.endpoint(ep);
                }
                if let Some(ref p) = config.prefix {
                    builder = builder.root(p);
                }

                let operator = Operator::new(builder)?.layer(timeout).finish();
                let name = format!(
                    "s3://{}{}",
                    bucket,
                    config
                        .prefix
                        .as_deref()
                        .map(|p| format!("/{}", p))
                        .unwrap_or_default()
                );
                Ok(Self::new(operator, name))
            }
            RemoteType::WebDav => {
                let endpoint = config
                    .endpoint
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("WebDAV remote requires endpoint"))?;
                let username = config
                    .username
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("WebDAV remote requires username"))?;
                let password = config
                    .password
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("WebDAV remote requires password"))?;

                let mut builder = opendal::services::Webdav::default()
                    .endpoint(endpoint)
                    .username(username)
                    .password(password);
                if let Some(ref r) = config.root {
                    builder = builder.root(r);
                }

                let operator = Operator::new(builder)?.layer(timeout).finish();
                // 某些 WebDAV 服务器需要先建目录，已存在时忽略错误
                let _ = operator.create_dir(FILES_PREFIX).await;
                let _ = operator.create_dir(META_PREFIX).await;

                let name = format!(
                    "webdav://{}{}",
                    endpoint.trim_end_matches('/'),
                    config
                        .root
                        .as_deref()
                        .map(|r| format!("/{}", r.trim_start_matches('/')))
                        .unwrap_or_default()
                );
                Ok(Self::new(operator, name))
            }
            RemoteType::Memory => {
                let operator = Operator::new(opendal::services::Memory::default())?.finish();
                Ok(Self::new(operator, "memory"))
            }
        }
    }

    fn content_path(name: &str) -> String {
        format!("{}{}", FILES_PREFIX, name)
    }

    fn meta_path(name: &str) -> String {
        format!("{}{}.json", META_PREFIX, name)
    }

    fn link_for(name: &str) -> String {
        format!("{}{}", FILES_PREFIX, urlencoding::encode(name))
    }

    /// 将下载链接还原为存储路径
    fn resolve_link(href: &str) -> Result<String, RemoteCallError> {
        let encoded = href.strip_prefix(FILES_PREFIX).ok_or_else(|| {
            RemoteCallError::new(
                RemoteErrorKind::InvalidRequest,
                format!("无效的下载链接: {:?}", href),
            )
        })?;
        let name = urlencoding::decode(encoded).map_err(|e| {
            RemoteCallError::new(RemoteErrorKind::MalformedResponse, e.to_string())
        })?;
        Ok(Self::content_path(&name))
    }

    async fn read_descriptor(&self, name: &str) -> Result<Option<RemoteDescriptor>, RemoteCallError> {
        match self.operator.read(&Self::meta_path(name)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data.to_vec())?)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stream_from_file(&self, source: &Path, target: &str) -> Result<u64, RemoteCallError> {
        let mut file = tokio::fs::File::open(source).await?;
        let mut writer = self.operator.writer(target).await?;
        let mut buffer = vec![0u8; TRANSFER_BLOCK_SIZE];
        let mut total = 0u64;

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            writer.write(buffer[..n].to_vec()).await?;
            total += n as u64;
        }
        writer.close().await?;
        Ok(total)
    }

    async fn stream_to_file(&self, source: &str, size: u64, target: &Path) -> Result<(), RemoteCallError> {
        let mut file = tokio::fs::File::create(target).await?;
        let mut offset = 0u64;

        while offset < size {
            let end = (offset + TRANSFER_BLOCK_SIZE as u64).min(size);
            let data = self
                .operator
                .read_with(source)
                .range(offset..end)
                .await?
                .to_vec();
            if data.is_empty() {
                break;
            }
            file.write_all(&data).await?;
            offset += data.len() as u64;
            debug!("下载进度 {}: {}/{} 字节", source, offset, size);
        }

        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for StoreGateway {
    async fn query_files(
        &self,
        specs: &[QuerySpecifier],
    ) -> Result<Vec<RemoteDescriptor>, RemoteCallError> {
        if specs.is_empty() {
            return Err(RemoteCallError::new(
                RemoteErrorKind::InvalidRequest,
                "文件列表为空",
            ));
        }

        let mut found: Vec<RemoteDescriptor> = Vec::new();
        for spec in specs {
            let Some(desc) = self.read_descriptor(&spec.file_name).await? else {
                continue;
            };

            let path_matches = spec
                .original_path
                .as_deref()
                .map_or(true, |p| p.is_empty() || p == desc.original_file_path);

            if desc.last_modified_time == spec.timestamp
                && path_matches
                && !found.iter().any(|d| d.name == desc.name)
            {
                found.push(desc);
            }
        }

        debug!("{}: 查询 {} 个文件，命中 {} 个", self.name, specs.len(), found.len());
        Ok(found)
    }

    async fn send_file(&self, record: &FileRecord) -> Result<(), RemoteCallError> {
        let path = record
            .local_path()
            .filter(|_| record.exists())
            .ok_or_else(|| {
                RemoteCallError::new(
                    RemoteErrorKind::InvalidRequest,
                    format!("文件未在本地验证存在: {}", record),
                )
            })?;

        let target = Self::content_path(record.name());
        let total = if self.operator.info().full_capability().write_can_multi {
            self.stream_from_file(path, &target).await?
        } else {
            // 不支持分块写入的服务一次写入
            let data = tokio::fs::read(path).await?;
            let len = data.len() as u64;
            self.operator.write(&target, data).await?;
            len
        };

        let desc = RemoteDescriptor {
            name: record.name().to_string(),
            original_file_path: record.windows_path(),
            last_modified_time: record.compute_last_modified(),
            link: Link {
                href: Self::link_for(record.name()),
            },
        };
        self.operator
            .write(&Self::meta_path(record.name()), serde_json::to_vec(&desc)?)
            .await?;

        info!("{}: 已上传 {} ({} 字节)", self.name, record, total);
        Ok(())
    }

    async fn get_file(
        &self,
        record: &FileRecord,
        size: u64,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<(), RemoteCallError> {
        let source = Self::resolve_link(record.url().unwrap_or_default())?;
        let target = target_dir.join(record.name());

        if target.exists() && !overwrite {
            warn!("文件 {:?} 已存在，不覆盖", target);
            return Ok(());
        }

        tokio::fs::create_dir_all(target_dir).await?;
        info!("开始下载到 {:?}", target);

        if let Err(e) = self.stream_to_file(&source, size, &target).await {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e);
        }
        Ok(())
    }

    async fn props_file(&self, record: &FileRecord) -> Result<u64, RemoteCallError> {
        let path = Self::resolve_link(record.url().unwrap_or_default())?;
        let meta = self.operator.stat(&path).await?;
        Ok(meta.content_length())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
