//! 平台上传驱动
//!
//! 每个驱动负责一次上传尝试的完整协议流程：
//! 1. 初始化上传会话
//! 2. 按顺序上传分片（第 i+1 片必须等第 i 片响应后才发出）
//! 3. TikTok 额外轮询发布状态直到终态
//!
//! 驱动不直接修改上传记录，进度和阶段通过 `DriverObserver` 回报给调度器

pub mod tiktok;
pub mod youtube;

pub use tiktok::TikTokDriver;
pub use youtube::YouTubeDriver;

use super::chunk::{ChunkPlan, UploadChunk};
use super::error::UploadError;
use super::video::{UploadMetadata, VideoFile};
use crate::auth::Platform;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// 一次上传尝试的输入
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub upload_id: String,
    pub access_token: String,
    pub video: VideoFile,
    pub metadata: UploadMetadata,
    pub plan: ChunkPlan,
    /// 账号用户名（用于拼接 TikTok 作品链接）
    pub username: Option<String>,
}

/// 上传成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub video_id: String,
    pub video_url: Option<String>,
}

/// 驱动回调
pub trait DriverObserver: Send + Sync {
    /// 一个分片被平台接受
    fn on_chunk_uploaded(&self, uploaded_bytes: u64, total_bytes: u64);

    /// 分片全部上传完毕，进入平台处理阶段
    fn on_processing(&self);
}

#[async_trait]
pub trait UploadDriver: Send + Sync {
    fn platform(&self) -> Platform;

    async fn upload(
        &self,
        job: &UploadJob,
        observer: &dyn DriverObserver,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError>;
}

/// 读取分片数据；读取前检查取消
pub(crate) async fn read_chunk(
    job: &UploadJob,
    chunk: &UploadChunk,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, UploadError> {
    if cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    chunk
        .read_data(&job.video.path)
        .await
        .map_err(|e| UploadError::Validation(format!("Failed to read video file: {:#}", e)))
}

pub fn youtube_video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

pub fn tiktok_video_url(username: &str, video_id: &str) -> String {
    format!(
        "https://www.tiktok.com/@{}/video/{}",
        username.trim_start_matches('@'),
        video_id
    )
}
