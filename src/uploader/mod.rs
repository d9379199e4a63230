// 上传模块
//
// - 按平台规则规划分片
// - 平台驱动顺序上传分片（TikTok 额外轮询发布状态）
// - 进度存储 + 事件广播（进度事件节流）
// - 上传管理器：取消、重试、授权错误时强制刷新一次令牌

pub mod chunk;
pub mod driver;
pub mod error;
pub mod events;
pub mod manager;
pub mod store;
pub mod task;
pub mod video;

pub use chunk::{
    ChunkPlan, PlanError, UploadChunk, TIKTOK_DEFAULT_CHUNK_SIZE, TIKTOK_MAX_CHUNKS,
    TIKTOK_MAX_CHUNK_SIZE, TIKTOK_MIN_CHUNK_SIZE, TIKTOK_SINGLE_CHUNK_LIMIT, YOUTUBE_CHUNK_SIZE,
};
pub use driver::{
    DriverObserver, TikTokDriver, UploadDriver, UploadJob, UploadOutcome, YouTubeDriver,
};
pub use error::UploadError;
pub use events::{ProgressThrottler, UploadEvent};
pub use manager::{StartedUpload, UploadManager};
pub use store::UploadProgressStore;
pub use task::{UploadRecord, UploadStatus};
pub use video::{PrivacyLevel, UploadMetadata, VideoFile};
