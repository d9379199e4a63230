// 待上传视频及元数据

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 默认 MIME 类型
pub const DEFAULT_MIME_TYPE: &str = "video/mp4";

/// 本地视频文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFile {
    pub path: PathBuf,
    /// 文件名
    pub name: String,
    /// 文件大小（字节）
    pub size: u64,
    pub mime_type: String,
}

impl VideoFile {
    /// 从本地路径构建（读取文件大小、按扩展名推断 MIME 类型）
    ///
    /// 文件不存在、是目录或为空时返回错误信息
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .map_err(|e| format!("Video file not found: {} ({})", path.display(), e))?;

        if metadata.is_dir() {
            return Err(format!("Not a video file: {} is a directory", path.display()));
        }
        if metadata.len() == 0 {
            return Err(format!("Video file is empty: {}", path.display()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            mime_type: mime_type_for(path).to_string(),
        })
    }
}

/// 按扩展名推断视频 MIME 类型
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("avi") => "video/x-msvideo",
        Some("mkv") => "video/x-matroska",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("3gp") => "video/3gpp",
        Some("flv") => "video/x-flv",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// 可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    #[default]
    Public,
    Unlisted,
    Private,
    Followers,
}

impl PrivacyLevel {
    /// 宽松解析，未知取值按公开处理
    pub fn parse_lossy(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    /// TikTok privacy_level 取值
    pub fn tiktok_privacy_level(&self) -> &'static str {
        match self {
            PrivacyLevel::Public => "PUBLIC_TO_EVERYONE",
            PrivacyLevel::Unlisted => "MUTUAL_FOLLOW_FRIEND",
            PrivacyLevel::Private => "SELF_ONLY",
            PrivacyLevel::Followers => "FOLLOWER_OF_CREATOR",
        }
    }

    /// YouTube privacyStatus 取值（YouTube 没有仅粉丝可见，按私有处理）
    pub fn youtube_privacy_status(&self) -> &'static str {
        match self {
            PrivacyLevel::Public => "public",
            PrivacyLevel::Unlisted => "unlisted",
            PrivacyLevel::Private | PrivacyLevel::Followers => "private",
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrivacyLevel::Public => "public",
            PrivacyLevel::Unlisted => "unlisted",
            PrivacyLevel::Private => "private",
            PrivacyLevel::Followers => "followers",
        };
        f.write_str(s)
    }
}

impl FromStr for PrivacyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(PrivacyLevel::Public),
            "unlisted" => Ok(PrivacyLevel::Unlisted),
            "private" => Ok(PrivacyLevel::Private),
            "followers" => Ok(PrivacyLevel::Followers),
            other => Err(format!("unknown privacy level: {}", other)),
        }
    }
}

/// 上传元数据
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub privacy: PrivacyLevel,
    /// YouTube 分类，未指定时使用配置中的默认分类
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub disable_comment: bool,
    #[serde(default)]
    pub disable_duet: bool,
    #[serde(default)]
    pub disable_stitch: bool,
}

impl UploadMetadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}
