// 平台接口错误定义

use crate::auth::Platform;
use serde_json::Value;
use thiserror::Error;

/// 平台接口调用错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlatformError {
    /// 网络层失败（连接、TLS、读取响应体等）
    #[error("{platform} 网络请求失败: {message}")]
    Transport { platform: Platform, message: String },

    /// 平台返回了错误（非 2xx，或 TikTok 的 error.code != "ok"）
    #[error("{}", user_message(*platform, code.as_deref(), message))]
    Api {
        platform: Platform,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// 响应格式不符合预期
    #[error("{platform} 响应解析失败: {message}")]
    Decode { platform: Platform, message: String },
}

/// 错误分类，决定上层的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorKind {
    /// 令牌无效/过期、权限缺失（触发一次刷新）
    Auth,
    /// 限流
    RateLimited,
    /// 平台策略拒绝（垃圾内容、无发布权限、用户上限、未审核应用）
    Policy,
    /// 网络失败或其他非 2xx 响应
    Transport,
}

impl PlatformErrorKind {
    /// 从平台错误码转换
    ///
    /// 同时覆盖 TikTok 错误码、Google API 的 reason 以及 OAuth 的 error 字段
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "access_token_invalid" | "scope_not_authorized" | "invalid_grant"
            | "invalid_token" | "authError" | "insufficientPermissions" | "unauthorized" => {
                Some(PlatformErrorKind::Auth)
            }
            "rate_limit_exceeded" | "rateLimitExceeded" | "userRateLimitExceeded"
            | "quotaExceeded" => Some(PlatformErrorKind::RateLimited),
            "spam_risk_user_banned"
            | "user_has_no_video_post_permission"
            | "reached_active_user_cap"
            | "unaudited_client_can_only_post_to_private"
            | "uploadLimitExceeded" => Some(PlatformErrorKind::Policy),
            _ => None,
        }
    }

    fn from_status(status: u16) -> Self {
        match status {
            401 => PlatformErrorKind::Auth,
            429 => PlatformErrorKind::RateLimited,
            _ => PlatformErrorKind::Transport,
        }
    }
}

impl PlatformError {
    pub fn transport(platform: Platform, err: impl std::fmt::Display) -> Self {
        PlatformError::Transport {
            platform,
            message: err.to_string(),
        }
    }

    pub fn decode(platform: Platform, err: impl std::fmt::Display) -> Self {
        PlatformError::Decode {
            platform,
            message: err.to_string(),
        }
    }

    /// 从错误响应体构造（尽力解析 JSON，失败则使用原始文本）
    pub fn from_response(platform: Platform, status: u16, body: &str) -> Self {
        let (code, message) = parse_error_body(body);
        let message = message.unwrap_or_else(|| {
            let raw = body.trim();
            if raw.is_empty() {
                format!("HTTP {}", status)
            } else {
                raw.to_string()
            }
        });

        PlatformError::Api {
            platform,
            status,
            code,
            message,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformError::Transport { platform, .. }
            | PlatformError::Api { platform, .. }
            | PlatformError::Decode { platform, .. } => *platform,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            PlatformError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> PlatformErrorKind {
        match self {
            PlatformError::Api { status, code, .. } => code
                .as_deref()
                .and_then(PlatformErrorKind::from_code)
                .unwrap_or_else(|| PlatformErrorKind::from_status(*status)),
            PlatformError::Transport { .. } | PlatformError::Decode { .. } => {
                PlatformErrorKind::Transport
            }
        }
    }
}

/// 面向用户的错误提示
///
/// TikTok 已知错误码映射为固定提示，未知错误码原样带出平台消息
pub fn user_message(platform: Platform, code: Option<&str>, message: &str) -> String {
    if platform == Platform::TikTok {
        if let Some(mapped) = code.and_then(tiktok_error_message) {
            return mapped.to_string();
        }
    }
    format!("{} API Error: {}", platform.display_name(), message)
}

/// TikTok 已知错误码的提示文案
pub fn tiktok_error_message(code: &str) -> Option<&'static str> {
    let message = match code {
        "access_token_invalid" => "Invalid access token. Please reconnect your TikTok account.",
        "scope_not_authorized" => {
            "Missing required permissions. Please reconnect your TikTok account."
        }
        "rate_limit_exceeded" => "Too many requests. Please wait a moment and try again.",
        "spam_risk_user_banned" => "Account has been flagged for spam risk.",
        "user_has_no_video_post_permission" => "Account does not have permission to post videos.",
        "reached_active_user_cap" => "TikTok has reached its active user limit for this app.",
        "unaudited_client_can_only_post_to_private" => {
            "Videos can only be posted as private until the app is audited by TikTok."
        }
        _ => return None,
    };
    Some(message)
}

/// 从错误响应体中提取 (code, message)
///
/// 支持的格式：
/// - TikTok: `{"error": {"code": "...", "message": "..."}}`
/// - Google API: `{"error": {"code": 403, "message": "...", "errors": [{"reason": "..."}]}}`
/// - OAuth: `{"error": "invalid_grant", "error_description": "..."}`
pub(crate) fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };

    match json.get("error") {
        Some(Value::Object(error)) => {
            let code = match error.get("code") {
                Some(Value::String(code)) => Some(code.clone()),
                _ => error
                    .get("errors")
                    .and_then(|e| e.get(0))
                    .and_then(|e| e.get("reason"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            (code, message)
        }
        Some(Value::String(code)) => {
            let message = json
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(code.clone()));
            (Some(code.clone()), message)
        }
        _ => (
            None,
            json.get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
    }
}
