// 认证模块数据类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 视频平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "youtube")]
    YouTube,
    #[serde(rename = "tiktok")]
    TikTok,
}

impl Platform {
    /// 所有支持的平台
    pub const ALL: [Platform; 2] = [Platform::YouTube, Platform::TikTok];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
        }
    }

    /// 用于提示信息的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::TikTok => "TikTok",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Ok(Platform::YouTube),
            "tiktok" | "tt" => Ok(Platform::TikTok),
            other => Err(format!("未知平台: {}", other)),
        }
    }
}

/// 平台相关的账号资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum AccountProfile {
    #[serde(rename = "youtube")]
    YouTube {
        /// 频道ID
        channel_id: String,
        /// 频道名称
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscriber_count: Option<u64>,
    },
    #[serde(rename = "tiktok")]
    TikTok {
        /// 用户 open_id
        open_id: String,
        /// 用户名（拼接视频链接时使用）
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        follower_count: Option<u64>,
    },
}

impl AccountProfile {
    pub fn platform(&self) -> Platform {
        match self {
            AccountProfile::YouTube { .. } => Platform::YouTube,
            AccountProfile::TikTok { .. } => Platform::TikTok,
        }
    }

    /// 用于列表展示的名称
    pub fn label(&self) -> &str {
        match self {
            AccountProfile::YouTube { title, .. } => title,
            AccountProfile::TikTok {
                display_name,
                username,
                ..
            } => display_name.as_deref().unwrap_or(username),
        }
    }
}

/// 已连接的平台账号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// 账号标识（YouTube 频道ID / TikTok open_id）
    pub id: String,
    pub access_token: String,
    /// 没有 refresh_token 的账号永远不会被自动刷新
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// 过期时间（Unix 毫秒时间戳）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub profile: AccountProfile,
}

impl Account {
    pub fn platform(&self) -> Platform {
        self.profile.platform()
    }

    /// 能否自动刷新
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// TikTok 用户名
    pub fn username(&self) -> Option<&str> {
        match &self.profile {
            AccountProfile::TikTok { username, .. } if !username.is_empty() => Some(username),
            _ => None,
        }
    }

    /// 合并刷新得到的新令牌
    ///
    /// 平台未返回新的 refresh_token 时沿用旧值
    pub fn apply_refresh(&mut self, tokens: &RefreshedTokens) {
        self.access_token = tokens.access_token.clone();
        if let Some(refresh_token) = &tokens.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
        if let Some(expires_at) = tokens.expires_at {
            self.expires_at = Some(expires_at);
        }
    }
}

/// 令牌接口返回的新令牌
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// 过期时间（Unix 毫秒时间戳），接口未返回 expires_in 时为 None
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl RefreshedTokens {
    /// 由 `expires_in`（秒）换算过期时间
    pub fn from_expires_in(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at: expires_in.map(|secs| now_ms + secs * 1000),
        }
    }
}
