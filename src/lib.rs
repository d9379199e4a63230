// OmniPost 上传核心库
// 多平台（YouTube / TikTok）可续传上传与 OAuth 令牌生命周期管理

// 账号、会话与令牌生命周期
pub mod auth;

// 时钟、退避等公共工具
pub mod common;

// 配置管理模块
pub mod config;

// 日志
pub mod logging;

// 平台 HTTP 客户端
pub mod platform;

// 上传编排
pub mod uploader;

// 导出常用类型
pub use auth::{
    Account, AccountProfile, AccountStore, JsonFileAccountStore, Platform, Session,
    TokenError, TokenManager, TokenMonitor,
};
pub use config::AppConfig;
pub use platform::{PlatformClients, PlatformError};
pub use uploader::{
    PrivacyLevel, UploadError, UploadEvent, UploadManager, UploadMetadata, UploadRecord,
    UploadStatus, VideoFile,
};
