//! 测试用网关：记录调用次数、批次大小与并发度

use super::{Link, QuerySpecifier, RemoteDescriptor, RemoteGateway};
use crate::core::FileRecord;
use crate::error::{RemoteCallError, RemoteErrorKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 上传调用的开始/结束事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    Started(String),
    Finished(String),
}

#[derive(Default)]
pub struct MockGateway {
    present: Mutex<Vec<RemoteDescriptor>>,
    sizes: Mutex<HashMap<String, u64>>,
    query_batches: Mutex<Vec<usize>>,
    fail_query_call: Mutex<Option<usize>>,
    fail_send: Mutex<HashSet<String>>,
    panic_send: Mutex<HashSet<String>>,
    sent: Mutex<Vec<String>>,
    downloads: Mutex<Vec<(String, u64)>>,
    send_delay: Mutex<Option<Duration>>,
    name_delays: Mutex<HashMap<String, Duration>>,
    send_events: Mutex<Vec<SendEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把本地记录登记为远程已存在
    pub fn mark_present(&self, record: &FileRecord) {
        let href = format!("files/{}", record.name());
        self.present.lock().unwrap().push(RemoteDescriptor {
            name: record.name().to_string(),
            original_file_path: record.windows_path(),
            last_modified_time: record.last_modified().to_string(),
            link: Link { href: href.clone() },
        });
        self.sizes.lock().unwrap().insert(href, record.size());
    }

    /// 第 `call` 次（从 1 开始）查询失败
    pub fn fail_query_on(&self, call: usize) {
        *self.fail_query_call.lock().unwrap() = Some(call);
    }

    pub fn fail_send_for(&self, name: &str) {
        self.fail_send.lock().unwrap().insert(name.to_string());
    }

    pub fn panic_send_for(&self, name: &str) {
        self.panic_send.lock().unwrap().insert(name.to_string());
    }

    pub fn with_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    /// 只对指定文件的上传延迟
    pub fn delay_send_for(&self, name: &str, delay: Duration) {
        self.name_delays
            .lock()
            .unwrap()
            .insert(name.to_string(), delay);
    }

    pub fn send_events(&self) -> Vec<SendEvent> {
        self.send_events.lock().unwrap().clone()
    }

    pub fn query_batches(&self) -> Vec<usize> {
        self.query_batches.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> Vec<(String, u64)> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn query_files(
        &self,
        specs: &[QuerySpecifier],
    ) -> Result<Vec<RemoteDescriptor>, RemoteCallError> {
        let call = {
            let mut batches = self.query_batches.lock().unwrap();
            batches.push(specs.len());
            batches.len()
        };
        if *self.fail_query_call.lock().unwrap() == Some(call) {
            return Err(RemoteCallError::new(
                RemoteErrorKind::Network,
                format!("query call {} failed", call),
            ));
        }

        let present = self.present.lock().unwrap();
        Ok(present
            .iter()
            .filter(|d| {
                specs
                    .iter()
                    .any(|s| s.file_name == d.name && s.timestamp == d.last_modified_time)
            })
            .cloned()
            .collect())
    }

    async fn send_file(&self, record: &FileRecord) -> Result<(), RemoteCallError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.send_events
            .lock()
            .unwrap()
            .push(SendEvent::Started(record.name().to_string()));

        let delay = self
            .name_delays
            .lock()
            .unwrap()
            .get(record.name())
            .copied()
            .or(*self.send_delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.send_events
            .lock()
            .unwrap()
            .push(SendEvent::Finished(record.name().to_string()));

        if self.panic_send.lock().unwrap().contains(record.name()) {
            panic!("worker crashed on {}", record.name());
        }
        if self.fail_send.lock().unwrap().contains(record.name()) {
            return Err(RemoteCallError::new(
                RemoteErrorKind::Network,
                format!("upload of {} rejected", record.name()),
            ));
        }
        self.sent.lock().unwrap().push(record.name().to_string());
        Ok(())
    }

    async fn get_file(
        &self,
        record: &FileRecord,
        size: u64,
        _target_dir: &Path,
        _overwrite: bool,
    ) -> Result<(), RemoteCallError> {
        self.downloads
            .lock()
            .unwrap()
            .push((record.name().to_string(), size));
        Ok(())
    }

    async fn props_file(&self, record: &FileRecord) -> Result<u64, RemoteCallError> {
        let url = record.url().unwrap_or_default();
        self.sizes
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .ok_or_else(|| RemoteCallError::new(RemoteErrorKind::NotFound, url.to_string()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
