//! 错误类型

use std::fmt;
use thiserror::Error;

/// 远程调用错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// 网络或服务端异常
    Network,
    /// 认证或权限失败
    Authentication,
    /// 远程对象不存在
    NotFound,
    /// 响应格式错误
    MalformedResponse,
    /// 请求参数无效
    InvalidRequest,
    /// 本地读写失败
    Io,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteErrorKind::Network => write!(f, "network"),
            RemoteErrorKind::Authentication => write!(f, "authentication"),
            RemoteErrorKind::NotFound => write!(f, "not_found"),
            RemoteErrorKind::MalformedResponse => write!(f, "malformed_response"),
            RemoteErrorKind::InvalidRequest => write!(f, "invalid_request"),
            RemoteErrorKind::Io => write!(f, "io"),
        }
    }
}

/// 远程网关返回的错误
#[derive(Debug, Clone, Error)]
#[error("远程调用失败 ({kind}): {message}")]
pub struct RemoteCallError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteCallError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<opendal::Error> for RemoteCallError {
    fn from(e: opendal::Error) -> Self {
        let kind = match e.kind() {
            opendal::ErrorKind::NotFound => RemoteErrorKind::NotFound,
            opendal::ErrorKind::PermissionDenied => RemoteErrorKind::Authentication,
            opendal::ErrorKind::ConfigInvalid | opendal::ErrorKind::Unsupported => {
                RemoteErrorKind::InvalidRequest
            }
            _ => RemoteErrorKind::Network,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for RemoteCallError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(RemoteErrorKind::MalformedResponse, e.to_string())
    }
}

impl From<std::io::Error> for RemoteCallError {
    fn from(e: std::io::Error) -> Self {
        Self::new(RemoteErrorKind::Io, e.to_string())
    }
}

/// 同步引擎错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 文件未在本地验证存在
    #[error("文件不存在: {0}")]
    FileMissing(String),

    /// 无效或重复的文件记录
    #[error("无效的文件记录: {0}")]
    FileInvalid(String),

    #[error(transparent)]
    RemoteCall(#[from] RemoteCallError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
