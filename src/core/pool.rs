//! 并行上传工作池
//!
//! 工作单元是可序列化的 [`TransferJob`]，跨越工作者边界时编码为 JSON；
//! 每个工作者通过 [`GatewayFactory`] 建立自己的网关连接。

use crate::core::record::FileRecord;
use crate::gateway::{GatewayFactory, RemoteGateway};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// 最大并行工作者数
pub const MAX_WORKERS: usize = 10;

/// 跨工作者传递的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    pub record: FileRecord,
}

/// 单个记录的传输结果
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub succeeded: bool,
    pub record: FileRecord,
    pub message: String,
}

/// 池级别错误，整批结果不可信
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("工作单元无法编码: {0}")]
    Encode(String),
    #[error("工作者异常退出: {0}")]
    WorkerLost(String),
    #[error("传输池已关闭")]
    Closed,
}

/// 工作者回传的结果
#[derive(Debug)]
struct TransferReply {
    succeeded: bool,
    message: String,
}

struct Dispatch {
    payload: Vec<u8>,
    reply: oneshot::Sender<TransferReply>,
}

/// 有界的上传工作池，每次 `upload` 创建、结束后关闭
pub struct TransferPool {
    size: usize,
    jobs: Option<mpsc::Sender<Dispatch>>,
    workers: Vec<JoinHandle<()>>,
}

impl TransferPool {
    pub fn new(requested: usize, factory: Arc<dyn GatewayFactory>) -> Self {
        let size = requested.clamp(1, MAX_WORKERS);
        let (tx, rx) = mpsc::channel::<Dispatch>(size);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|id| tokio::spawn(worker_loop(id, factory.clone(), rx.clone())))
            .collect();

        Self {
            size,
            jobs: Some(tx),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 分发一批记录并等待全部结果，结果顺序与输入一致
    pub async fn run_chunk(
        &mut self,
        chunk: Vec<FileRecord>,
    ) -> Result<Vec<TransferOutcome>, PoolError> {
        let jobs = self.jobs.as_ref().ok_or(PoolError::Closed)?;

        let payloads = chunk
            .iter()
            .map(|record| {
                serde_json::to_vec(&TransferJob {
                    record: record.clone(),
                })
                .map_err(|e| PoolError::Encode(format!("{}: {}", record, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pending = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let (reply, rx) = oneshot::channel();
            jobs.send(Dispatch { payload, reply })
                .await
                .map_err(|_| PoolError::Closed)?;
            pending.push(rx);
        }

        let mut outcomes = Vec::with_capacity(chunk.len());
        for (record, rx) in chunk.into_iter().zip(pending) {
            let reply = rx
                .await
                .map_err(|_| PoolError::WorkerLost(format!("上传 {} 时工作者退出", record)))?;
            outcomes.push(TransferOutcome {
                succeeded: reply.succeeded,
                record,
                message: reply.message,
            });
        }
        Ok(outcomes)
    }

    /// 关闭任务队列并等待所有工作者退出
    pub async fn shutdown(mut self) {
        self.jobs.take();
        for result in futures::future::join_all(self.workers.drain(..)).await {
            if let Err(e) = result {
                warn!("上传工作者异常结束: {}", e);
            }
        }
    }
}

async fn worker_loop(
    id: usize,
    factory: Arc<dyn GatewayFactory>,
    jobs: Arc<Mutex<mpsc::Receiver<Dispatch>>>,
) {
    let gateway = factory.connect().await.map_err(|e| {
        error!("工作者 {} 无法连接远程存储: {}", id, e);
        e.to_string()
    });

    loop {
        let next = { jobs.lock().await.recv().await };
        let Some(dispatch) = next else {
            break;
        };

        let reply = match &gateway {
            Ok(gateway) => transfer(id, gateway.as_ref(), &dispatch.payload).await,
            Err(msg) => TransferReply {
                succeeded: false,
                message: format!("无法连接远程存储: {}", msg),
            },
        };
        let _ = dispatch.reply.send(reply);
    }
    debug!("工作者 {} 退出", id);
}

async fn transfer(id: usize, gateway: &dyn RemoteGateway, payload: &[u8]) -> TransferReply {
    let job: TransferJob = match serde_json::from_slice(payload) {
        Ok(job) => job,
        Err(e) => {
            return TransferReply {
                succeeded: false,
                message: format!("工作单元无法解码: {}", e),
            }
        }
    };

    let mut record = job.record;
    debug!("工作者 {} 开始上传: {}", id, record);
    match record.upload(gateway, true).await {
        Ok(outcome) => TransferReply {
            succeeded: true,
            message: format!("{:?}", outcome),
        },
        Err(e) => TransferReply {
            succeeded: false,
            message: e.to_string(),
        },
    }
}
