// 上传记录定义
//
// 状态流转：
//   pending -> uploading -> completed                 (YouTube)
//   pending -> uploading -> processing -> completed   (TikTok)
//   uploading | processing -> failed
//   uploading -> cancelled
//   failed -> pending                                 (重试，沿用同一个 ID)

use crate::auth::Platform;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 上传状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待中
    Pending,
    /// 上传中
    Uploading,
    /// 平台处理中（仅 TikTok）
    Processing,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadStatus {
    /// 终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }

    /// 正在进行
    pub fn is_active(&self) -> bool {
        matches!(self, UploadStatus::Uploading | UploadStatus::Processing)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 上传记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// 记录ID
    pub id: String,
    pub platform: Platform,
    /// 视频文件名
    pub file_name: String,
    pub status: UploadStatus,
    /// 进度 0-100
    pub progress: f64,
    /// 进度说明
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// 错误信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 失败原因是授权失效，需要重新连接账号
    #[serde(default)]
    pub needs_reauth: bool,
    /// 第几次尝试（从 1 开始，每次重试加 1）
    pub attempt: u32,
    /// 开始时间 (Unix 毫秒时间戳)
    pub started_at: i64,
    /// 结束时间 (Unix 毫秒时间戳)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl UploadRecord {
    /// 创建新的上传记录
    pub fn new(platform: Platform, file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform,
            file_name: file_name.into(),
            status: UploadStatus::Pending,
            progress: 0.0,
            message: None,
            video_id: None,
            video_url: None,
            error: None,
            needs_reauth: false,
            attempt: 1,
            started_at: now_millis(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) -> bool {
        if self.status != UploadStatus::Pending {
            return false;
        }
        self.status = UploadStatus::Uploading;
        self.started_at = now_millis();
        true
    }

    /// 更新进度，进度只增不减
    pub fn set_progress(&mut self, progress: f64, message: Option<String>) -> bool {
        if !self.status.is_active() {
            return false;
        }
        let progress = progress.clamp(0.0, 100.0);
        if progress > self.progress {
            self.progress = progress;
        }
        if message.is_some() {
            self.message = message;
        }
        true
    }

    /// 标记为平台处理中
    pub fn mark_processing(&mut self, message: impl Into<String>) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }
        self.status = UploadStatus::Processing;
        self.progress = 100.0;
        self.message = Some(message.into());
        true
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self, video_id: String, video_url: Option<String>) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = UploadStatus::Completed;
        self.progress = 100.0;
        self.video_id = Some(video_id);
        self.video_url = video_url;
        self.message = None;
        self.completed_at = Some(now_millis());
        true
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String, needs_reauth: bool) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = UploadStatus::Failed;
        self.error = Some(error);
        self.needs_reauth = needs_reauth;
        self.completed_at = Some(now_millis());
        true
    }

    /// 标记为已取消（仅上传中可取消）
    pub fn mark_cancelled(&mut self) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }
        self.status = UploadStatus::Cancelled;
        self.completed_at = Some(now_millis());
        true
    }

    /// 重置为新的一次尝试（仅失败可重试）
    pub fn reset_for_retry(&mut self) -> bool {
        if self.status != UploadStatus::Failed {
            return false;
        }
        self.status = UploadStatus::Pending;
        self.progress = 0.0;
        self.message = None;
        self.error = None;
        self.needs_reauth = false;
        self.video_id = None;
        self.video_url = None;
        self.completed_at = None;
        self.attempt += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = UploadRecord::new(Platform::YouTube, "clip.mp4");

        assert_eq!(record.status, UploadStatus::Pending);
        assert_eq!(record.progress, 0.0);
        assert_eq!(record.attempt, 1);
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_youtube_transitions() {
        let mut record = UploadRecord::new(Platform::YouTube, "clip.mp4");

        assert!(record.mark_uploading());
        assert!(record.set_progress(40.0, Some("Uploaded 4.0 MB".to_string())));
        // 进度不回退
        assert!(record.set_progress(20.0, None));
        assert_eq!(record.progress, 40.0);
        assert_eq!(record.message.as_deref(), Some("Uploaded 4.0 MB"));

        assert!(record.mark_completed("vid".to_string(), None));
        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(record.progress, 100.0);
        assert!(record.completed_at.is_some());

        // 终态不可再变
        assert!(!record.mark_failed("late".to_string(), false));
        assert!(!record.set_progress(50.0, None));
        assert!(!record.mark_cancelled());
    }

    #[test]
    fn test_tiktok_processing() {
        let mut record = UploadRecord::new(Platform::TikTok, "clip.mp4");
        record.mark_uploading();

        assert!(record.mark_processing("Processing on TikTok"));
        assert_eq!(record.status, UploadStatus::Processing);
        // 处理中不可取消
        assert!(!record.mark_cancelled());

        assert!(record.mark_failed("PUBLISH_FAILED".to_string(), false));
        assert_eq!(record.status, UploadStatus::Failed);
    }

    #[test]
    fn test_retry_reset() {
        let mut record = UploadRecord::new(Platform::TikTok, "clip.mp4");
        let id = record.id.clone();

        // 非失败状态不可重试
        assert!(!record.reset_for_retry());

        record.mark_uploading();
        record.set_progress(70.0, None);
        record.mark_failed("network".to_string(), true);

        assert!(record.reset_for_retry());
        assert_eq!(record.id, id);
        assert_eq!(record.status, UploadStatus::Pending);
        assert_eq!(record.progress, 0.0);
        assert!(record.error.is_none());
        assert!(record.completed_at.is_none());
        assert!(!record.needs_reauth);
        assert_eq!(record.attempt, 2);
    }

    #[test]
    fn test_cancel_only_while_uploading() {
        let mut record = UploadRecord::new(Platform::YouTube, "clip.mp4");
        assert!(!record.mark_cancelled());

        record.mark_uploading();
        assert!(record.mark_cancelled());
        assert_eq!(record.status, UploadStatus::Cancelled);
        assert!(!record.mark_completed("vid".to_string(), None));
    }
}
