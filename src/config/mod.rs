// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 令牌刷新配置
    #[serde(default)]
    pub token: TokenConfig,
    /// YouTube 接入配置
    #[serde(default)]
    pub youtube: YouTubeConfig,
    /// TikTok 接入配置
    #[serde(default)]
    pub tiktok: TikTokConfig,
    /// 账号存储配置
    #[serde(default)]
    pub accounts: AccountsConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 单次上传（从开始到结束）的总超时（秒）
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    /// TikTok 发布状态轮询间隔（毫秒）
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    /// TikTok 发布状态最大轮询次数
    #[serde(default = "default_max_status_polls")]
    pub max_status_polls: u32,
    /// YouTube 默认分类（22 = People & Blogs）
    #[serde(default = "default_category")]
    pub default_category: String,
    /// 进度事件节流间隔（毫秒）
    #[serde(default = "default_progress_throttle_ms")]
    pub progress_throttle_ms: u64,
}

fn default_overall_timeout_secs() -> u64 {
    300
}

fn default_status_poll_interval_ms() -> u64 {
    2000
}

fn default_max_status_polls() -> u32 {
    60
}

fn default_category() -> String {
    "22".to_string()
}

fn default_progress_throttle_ms() -> u64 {
    200
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            overall_timeout_secs: default_overall_timeout_secs(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            max_status_polls: default_max_status_polls(),
            default_category: default_category(),
            progress_throttle_ms: default_progress_throttle_ms(),
        }
    }
}

impl UploadConfig {
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}

/// 令牌刷新配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// 刷新失败后的最大重试次数（总尝试次数 = max_retries + 1）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 退避基础延迟（毫秒）
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 退避随机抖动上限（毫秒）
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// 提前多久视为过期（毫秒）
    #[serde(default = "default_expiry_skew_ms")]
    pub expiry_skew_ms: i64,
    /// 后台监控检查间隔（秒）
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// 距离过期小于该阈值时主动刷新（秒）
    #[serde(default = "default_monitor_threshold_secs")]
    pub monitor_threshold_secs: u64,
    /// 同一账号连续失败多少次后停止自动刷新
    #[serde(default = "default_max_monitor_failures")]
    pub max_monitor_failures: u32,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_expiry_skew_ms() -> i64 {
    60_000
}

fn default_monitor_interval_secs() -> u64 {
    5 * 60
}

fn default_monitor_threshold_secs() -> u64 {
    30 * 60
}

fn default_max_monitor_failures() -> u32 {
    5
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            expiry_skew_ms: default_expiry_skew_ms(),
            monitor_interval_secs: default_monitor_interval_secs(),
            monitor_threshold_secs: default_monitor_threshold_secs(),
            max_monitor_failures: default_max_monitor_failures(),
        }
    }
}

/// YouTube 接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YouTubeConfig {
    /// OAuth 客户端 ID
    #[serde(default)]
    pub client_id: String,
    /// OAuth 客户端密钥
    #[serde(default)]
    pub client_secret: String,
    /// 可续传上传接口
    #[serde(default = "default_youtube_upload_endpoint")]
    pub upload_endpoint: String,
    /// 令牌接口
    #[serde(default = "default_youtube_token_endpoint")]
    pub token_endpoint: String,
}

fn default_youtube_upload_endpoint() -> String {
    "https://www.googleapis.com/upload/youtube/v3/videos".to_string()
}

fn default_youtube_token_endpoint() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            upload_endpoint: default_youtube_upload_endpoint(),
            token_endpoint: default_youtube_token_endpoint(),
        }
    }
}

/// TikTok 接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TikTokConfig {
    /// 应用 client_key
    #[serde(default)]
    pub client_key: String,
    /// 应用密钥
    #[serde(default)]
    pub client_secret: String,
    /// Open API 根地址
    #[serde(default = "default_tiktok_api_base")]
    pub api_base: String,
}

fn default_tiktok_api_base() -> String {
    "https://open.tiktokapis.com/v2".to_string()
}

impl Default for TikTokConfig {
    fn default() -> Self {
        Self {
            client_key: String::new(),
            client_secret: String::new(),
            api_base: default_tiktok_api_base(),
        }
    }
}

/// 账号存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// 已连接账号的 JSON 文件
    #[serde(default = "default_accounts_store_path")]
    pub store_path: PathBuf,
}

fn default_accounts_store_path() -> PathBuf {
    PathBuf::from("config/accounts.json")
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            store_path: default_accounts_store_path(),
        }
    }
}

impl AppConfig {
    /// 检查取值是否可用
    pub fn validate(&self) -> Result<()> {
        if self.upload.overall_timeout_secs == 0 {
            anyhow::bail!("upload.overall_timeout_secs 必须大于 0");
        }
        if self.upload.status_poll_interval_ms == 0 {
            anyhow::bail!("upload.status_poll_interval_ms 必须大于 0");
        }
        if self.upload.max_status_polls == 0 {
            anyhow::bail!("upload.max_status_polls 必须大于 0");
        }
        if self.token.monitor_interval_secs == 0 {
            anyhow::bail!("token.monitor_interval_secs 必须大于 0");
        }
        if self.token.max_monitor_failures == 0 {
            anyhow::bail!("token.max_monitor_failures 必须大于 0");
        }
        if self.token.expiry_skew_ms < 0 {
            anyhow::bail!("token.expiry_skew_ms 不能为负数");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件取值无效")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 首次启动：写出一份默认配置，方便用户填写密钥
                if !std::path::Path::new(path).exists() {
                    if let Err(e) = default_config.save_to_file(path).await {
                        tracing::error!("保存默认配置失败: {}", e);
                    }
                }

                default_config
            }
        }
    }
}
