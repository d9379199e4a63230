//! 上传进度存储
//!
//! 所有上传记录的唯一持有者，供展示层读取和订阅：
//! - 按 ID 更新（DashMap 分段锁），多个上传并发更新互不丢失
//! - 驱动回调带上尝试序号，旧尝试的迟到回调直接忽略
//! - 记录进入终态后只接受重试
//! - 进度在同一次尝试内只增不减

use super::error::UploadError;
use super::events::{ProgressThrottler, UploadEvent, DEFAULT_THROTTLE_INTERVAL_MS};
use super::task::{UploadRecord, UploadStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct UploadProgressStore {
    records: DashMap<String, UploadRecord>,
    /// 创建顺序
    order: Mutex<Vec<String>>,
    throttlers: DashMap<String, ProgressThrottler>,
    throttle_interval: Duration,
    event_tx: broadcast::Sender<UploadEvent>,
}

impl Default for UploadProgressStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_THROTTLE_INTERVAL_MS))
    }
}

impl UploadProgressStore {
    pub fn new(throttle_interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: DashMap::new(),
            order: Mutex::new(Vec::new()),
            throttlers: DashMap::new(),
            throttle_interval,
            event_tx,
        }
    }

    /// 订阅上传事件
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: UploadEvent) {
        debug!(
            "上传事件: {} ({})",
            event.event_type_name(),
            event.upload_id()
        );
        // 没有订阅者时发送失败，忽略
        let _ = self.event_tx.send(event);
    }

    /// 添加新记录
    pub fn insert(&self, record: UploadRecord) {
        let event = UploadEvent::created(&record);
        let id = record.id.clone();

        self.throttlers
            .insert(id.clone(), ProgressThrottler::new(self.throttle_interval));
        self.records.insert(id.clone(), record);
        self.order.lock().push(id);

        self.emit(event);
    }

    pub fn get(&self, id: &str) -> Option<UploadRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按创建顺序返回所有记录
    pub fn snapshot(&self) -> Vec<UploadRecord> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// 对记录应用一次状态变更
    ///
    /// `attempt` 不为 None 时只对该次尝试生效；`f` 返回 false 表示变更被拒绝
    fn transition<F>(
        &self,
        id: &str,
        attempt: Option<u32>,
        f: F,
    ) -> Option<(UploadStatus, UploadRecord)>
    where
        F: FnOnce(&mut UploadRecord) -> bool,
    {
        let mut entry = self.records.get_mut(id)?;
        if let Some(attempt) = attempt {
            if entry.attempt != attempt {
                debug!(
                    "忽略过期回调: upload={}, attempt={}, current={}",
                    id, attempt, entry.attempt
                );
                return None;
            }
        }

        let record = entry.value_mut();
        let old_status = record.status;
        if !f(record) {
            return None;
        }
        Some((old_status, record.clone()))
    }

    fn emit_status_change(&self, old_status: UploadStatus, record: &UploadRecord) {
        if old_status != record.status {
            self.emit(UploadEvent::StatusChanged {
                upload_id: record.id.clone(),
                old_status,
                new_status: record.status,
            });
        }
    }

    /// pending -> uploading
    pub fn mark_uploading(&self, id: &str, attempt: u32) -> bool {
        match self.transition(id, Some(attempt), UploadRecord::mark_uploading) {
            Some((old, record)) => {
                if let Some(throttler) = self.throttlers.get(id) {
                    throttler.reset();
                }
                self.emit_status_change(old, &record);
                true
            }
            None => false,
        }
    }

    /// 更新进度（事件节流）
    pub fn report_progress(
        &self,
        id: &str,
        attempt: u32,
        progress: f64,
        message: Option<String>,
    ) -> bool {
        let Some((_, record)) =
            self.transition(id, Some(attempt), |r| r.set_progress(progress, message))
        else {
            return false;
        };

        let emit = self
            .throttlers
            .get(id)
            .map(|t| t.should_emit())
            .unwrap_or(true);
        if emit {
            self.emit(UploadEvent::Progress {
                upload_id: record.id,
                progress: record.progress,
                message: record.message,
            });
        }
        true
    }

    /// uploading -> processing
    pub fn mark_processing(&self, id: &str, attempt: u32, message: &str) -> bool {
        match self.transition(id, Some(attempt), |r| r.mark_processing(message)) {
            Some((old, record)) => {
                self.emit_status_change(old, &record);
                true
            }
            None => false,
        }
    }

    /// uploading | processing -> completed
    pub fn mark_completed(
        &self,
        id: &str,
        attempt: u32,
        video_id: String,
        video_url: Option<String>,
    ) -> bool {
        match self.transition(id, Some(attempt), |r| r.mark_completed(video_id, video_url)) {
            Some((old, record)) => {
                self.emit_status_change(old, &record);
                self.emit(UploadEvent::Completed {
                    upload_id: record.id,
                    video_id: record.video_id.unwrap_or_default(),
                    video_url: record.video_url,
                });
                true
            }
            None => false,
        }
    }

    /// 非终态 -> failed
    pub fn mark_failed(&self, id: &str, attempt: u32, error: String, needs_reauth: bool) -> bool {
        match self.transition(id, Some(attempt), |r| r.mark_failed(error, needs_reauth)) {
            Some((old, record)) => {
                self.emit_status_change(old, &record);
                self.emit(UploadEvent::Failed {
                    upload_id: record.id,
                    error: record.error.unwrap_or_default(),
                    needs_reauth: record.needs_reauth,
                });
                true
            }
            None => false,
        }
    }

    /// 用户取消（仅 uploading）
    pub fn cancel(&self, id: &str) -> Result<UploadRecord, UploadError> {
        let current = self
            .get(id)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        match self.transition(id, None, UploadRecord::mark_cancelled) {
            Some((old, record)) => {
                self.emit_status_change(old, &record);
                self.emit(UploadEvent::Cancelled {
                    upload_id: record.id.clone(),
                });
                Ok(record)
            }
            None => Err(UploadError::InvalidTransition {
                action: "cancel",
                status: current.status,
            }),
        }
    }

    /// 失败记录重置为 pending，开始新一次尝试
    pub fn retry(&self, id: &str) -> Result<UploadRecord, UploadError> {
        let current = self
            .get(id)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        match self.transition(id, None, UploadRecord::reset_for_retry) {
            Some((old, record)) => {
                self.emit_status_change(old, &record);
                Ok(record)
            }
            None => Err(UploadError::InvalidTransition {
                action: "retry",
                status: current.status,
            }),
        }
    }

    /// 删除记录
    pub fn remove(&self, id: &str) -> Option<UploadRecord> {
        let (_, record) = self.records.remove(id)?;
        self.throttlers.remove(id);
        self.order.lock().retain(|x| x != id);
        self.emit(UploadEvent::Removed {
            upload_id: id.to_string(),
        });
        Some(record)
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&UploadRecord) -> bool,
    {
        let ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        ids.iter().filter(|id| self.remove(id).is_some()).count()
    }

    /// 清除已完成的记录
    pub fn clear_completed(&self) -> usize {
        self.remove_where(|r| r.status == UploadStatus::Completed)
    }

    /// 清除所有不在进行中的记录
    pub fn clear(&self) -> usize {
        self.remove_where(|r| !r.status.is_active())
    }
}
