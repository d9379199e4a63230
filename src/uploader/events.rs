//! 上传事件
//!
//! 进度存储通过 broadcast 通道发布事件，展示层订阅后渲染。
//! 进度事件按上传记录节流，其余事件总是发布

use super::task::{UploadRecord, UploadStatus};
use crate::auth::Platform;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认节流间隔（毫秒）
pub const DEFAULT_THROTTLE_INTERVAL_MS: u64 = 200;

/// 上传事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// 记录创建
    Created { upload_id: String, platform: Platform, file_name: String },
    /// 进度更新
    Progress {
        upload_id: String,
        progress: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// 状态变更
    StatusChanged {
        upload_id: String,
        old_status: UploadStatus,
        new_status: UploadStatus,
    },
    /// 上传完成
    Completed {
        upload_id: String,
        video_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
    },
    /// 上传失败
    Failed {
        upload_id: String,
        error: String,
        needs_reauth: bool,
    },
    /// 已取消
    Cancelled { upload_id: String },
    /// 记录被清除
    Removed { upload_id: String },
}

impl UploadEvent {
    pub fn created(record: &UploadRecord) -> Self {
        UploadEvent::Created {
            upload_id: record.id.clone(),
            platform: record.platform,
            file_name: record.file_name.clone(),
        }
    }

    /// 获取记录 ID
    pub fn upload_id(&self) -> &str {
        match self {
            UploadEvent::Created { upload_id, .. }
            | UploadEvent::Progress { upload_id, .. }
            | UploadEvent::StatusChanged { upload_id, .. }
            | UploadEvent::Completed { upload_id, .. }
            | UploadEvent::Failed { upload_id, .. }
            | UploadEvent::Cancelled { upload_id }
            | UploadEvent::Removed { upload_id } => upload_id,
        }
    }

    /// 获取事件类型名称
    pub fn event_type_name(&self) -> &'static str {
        match self {
            UploadEvent::Created { .. } => "created",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::StatusChanged { .. } => "status_changed",
            UploadEvent::Completed { .. } => "completed",
            UploadEvent::Failed { .. } => "failed",
            UploadEvent::Cancelled { .. } => "cancelled",
            UploadEvent::Removed { .. } => "removed",
        }
    }

    /// 是否可以被节流丢弃
    pub fn is_throttleable(&self) -> bool {
        matches!(self, UploadEvent::Progress { .. })
    }
}

/// 进度事件节流器
///
/// 每条上传记录一个，记录上次发布时刻（相对 `origin` 的纳秒数）
#[derive(Debug)]
pub struct ProgressThrottler {
    origin: Instant,
    last_emit_nanos: AtomicU64,
    interval_nanos: u64,
}

impl ProgressThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            // u64::MAX 表示尚未发布过
            last_emit_nanos: AtomicU64::new(u64::MAX),
            interval_nanos: interval.as_nanos() as u64,
        }
    }

    pub fn with_millis(interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(interval_ms))
    }

    /// 距离上次发布超过间隔时返回 true 并记录本次发布
    pub fn should_emit(&self) -> bool {
        let now = self.origin.elapsed().as_nanos() as u64;
        let last = self.last_emit_nanos.load(Ordering::Relaxed);

        if last != u64::MAX && now.saturating_sub(last) < self.interval_nanos {
            return false;
        }

        self.last_emit_nanos
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// 重置（新一次尝试开始时）
    pub fn reset(&self) {
        self.last_emit_nanos.store(u64::MAX, Ordering::Relaxed);
    }
}

impl Default for ProgressThrottler {
    fn default() -> Self {
        Self::with_millis(DEFAULT_THROTTLE_INTERVAL_MS)
    }
}
