//! 应用配置模块

use crate::core::{DEFAULT_BATCH_SIZE, MAX_WORKERS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 每次存在性查询的文件数
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 并行上传数，小于 2 时顺序上传
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 是否跳过远程存在性检查
    #[serde(default)]
    pub force: bool,
    /// 下载时是否覆盖已有文件
    #[serde(default)]
    pub overwrite: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_workers() -> usize {
    1
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            force: false,
            overwrite: false,
        }
    }
}

impl TransferConfig {
    /// 实际使用的并行数（上限 10）
    pub fn effective_workers(&self) -> usize {
        self.workers.min(MAX_WORKERS)
    }

    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "transfer").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "transfer", self)
    }
}

/// 远程存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Local,
    S3,
    WebDav,
    Memory,
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    #[serde(rename = "type")]
    pub typ: RemoteType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl RemoteConfig {
    /// 本地目录作为远程存储
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::of_type(RemoteType::Local)
        }
    }

    /// 进程内存储，每次连接都是独立实例
    pub fn memory() -> Self {
        Self::of_type(RemoteType::Memory)
    }

    fn of_type(typ: RemoteType) -> Self {
        Self {
            typ,
            path: None,
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            endpoint: None,
            prefix: None,
            username: None,
            password: None,
            root: None,
        }
    }

    pub fn load(config_dir: &Path) -> Option<Self> {
        load_section(config_dir, "remote")
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "remote", self)
    }
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
    } else {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    };

    base.map(|p| p.join("batchsync"))
        .unwrap_or_else(|| PathBuf::from(".batchsync"))
}

/// 从 config.json 读取一个配置段，缺失或损坏时返回 None
pub(crate) fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join("config.json")).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    serde_json::from_value(config.get(key)?.clone()).ok()
}

/// 更新 config.json 中的一个配置段，保留其他内容
pub(crate) fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let config_file = config_dir.join("config.json");

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };
    if !config.is_object() {
        config = serde_json::json!({});
    }

    config[key] = serde_json::to_value(value)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}
