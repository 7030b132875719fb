pub mod store;

#[cfg(test)]
pub(crate) mod mock;

use crate::core::FileRecord;
use crate::error::RemoteCallError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub use store::StoreGateway;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, query 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 存在性查询条件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpecifier {
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "OriginalPath", skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
}

/// 提交任务时使用的文件描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSpecifier {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
}

/// 下载链接
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub href: String,
}

/// 远程返回的文件描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDescriptor {
    #[serde(default = "default_remote_name")]
    pub name: String,
    #[serde(default)]
    pub original_file_path: String,
    #[serde(default)]
    pub last_modified_time: String,
    #[serde(default)]
    pub link: Link,
}

fn default_remote_name() -> String {
    "Unknown".to_string()
}

/// 远程存储网关
///
/// 所有调用都以 `Result` 返回，失败按 [`crate::error::RemoteErrorKind`] 分类。
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// 批量查询已存在于远程的文件
    async fn query_files(
        &self,
        specs: &[QuerySpecifier],
    ) -> Result<Vec<RemoteDescriptor>, RemoteCallError>;

    /// 上传单个本地文件
    async fn send_file(&self, record: &FileRecord) -> Result<(), RemoteCallError>;

    /// 下载远程文件到 `target_dir`
    async fn get_file(
        &self,
        record: &FileRecord,
        size: u64,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<(), RemoteCallError>;

    /// 获取远程文件大小（字节）
    async fn props_file(&self, record: &FileRecord) -> Result<u64, RemoteCallError>;

    /// 获取网关名称（用于日志）
    fn name(&self) -> &str;
}

/// 为每个传输工作者独立创建网关连接
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Arc<dyn RemoteGateway>>;
}

/// 复用同一个网关实例的工厂
#[derive(Clone)]
pub struct SharedGateway(pub Arc<dyn RemoteGateway>);

#[async_trait]
impl GatewayFactory for SharedGateway {
    async fn connect(&self) -> anyhow::Result<Arc<dyn RemoteGateway>> {
        Ok(self.0.clone())
    }
}

/// 根据配置创建网关实例
pub async fn create_gateway(
    config: &crate::config::RemoteConfig,
) -> anyhow::Result<Arc<dyn RemoteGateway>> {
    let gateway = StoreGateway::from_config(config).await?;
    tracing::info!("初始化远程存储: {}", gateway.name());
    Ok(Arc::new(gateway) as Arc<dyn RemoteGateway>)
}

#[async_trait]
impl GatewayFactory for crate::config::RemoteConfig {
    async fn connect(&self) -> anyhow::Result<Arc<dyn RemoteGateway>> {
        create_gateway(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_server_shape() {
        let json = r#"{
            "name": "scene.blend",
            "originalFilePath": "C:\\work\\scene.blend",
            "lastModifiedTime": "2024-03-01T10:00:00Z",
            "link": {"href": "files/scene.blend"}
        }"#;
        let desc: RemoteDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.name, "scene.blend");
        assert_eq!(desc.original_file_path, "C:\\work\\scene.blend");
        assert_eq!(desc.link.href, "files/scene.blend");

        let bare: RemoteDescriptor = serde_json::from_str("{}").unwrap();
        assert_eq!(bare.name, "Unknown");
        assert!(bare.link.href.is_empty());
    }

    #[test]
    fn test_query_specifier_wire_names() {
        let spec = QuerySpecifier {
            file_name: "a.png".to_string(),
            timestamp: "2024-03-01T10:00:00Z".to_string(),
            original_path: None,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["FileName"], "a.png");
        assert!(value.get("OriginalPath").is_none());
    }
}
