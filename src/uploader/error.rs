// 上传错误分类

use super::chunk::PlanError;
use super::task::UploadStatus;
use crate::auth::TokenError;
use crate::platform::{PlatformError, PlatformErrorKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UploadError {
    /// 前置条件不满足（未选择视频、账号未连接等），不会发起任何网络请求
    #[error("{0}")]
    Validation(String),

    /// 令牌无效/过期或权限缺失
    #[error("{message}")]
    Auth { message: String, needs_reauth: bool },

    /// 平台限流
    #[error("{0}")]
    RateLimited(String),

    /// 平台策略拒绝
    #[error("{0}")]
    Policy(String),

    /// 网络失败或非 2xx 响应
    #[error("{0}")]
    Transport(String),

    /// 状态轮询次数耗尽或整体超时
    #[error("{0}")]
    Timeout(String),

    /// 用户取消
    #[error("Upload cancelled by user")]
    Cancelled,

    #[error("upload not found: {0}")]
    NotFound(String),

    #[error("cannot {action} an upload that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: UploadStatus,
    },
}

impl UploadError {
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            UploadError::Auth {
                needs_reauth: true,
                ..
            }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, UploadError::Auth { .. })
    }
}

impl From<PlatformError> for UploadError {
    fn from(err: PlatformError) -> Self {
        let message = err.to_string();
        match err.kind() {
            PlatformErrorKind::Auth => UploadError::Auth {
                message,
                needs_reauth: false,
            },
            PlatformErrorKind::RateLimited => UploadError::RateLimited(message),
            PlatformErrorKind::Policy => UploadError::Policy(message),
            PlatformErrorKind::Transport => UploadError::Transport(message),
        }
    }
}

impl From<TokenError> for UploadError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotConnected(_) => UploadError::Validation(err.to_string()),
            other => UploadError::Auth {
                message: other.to_string(),
                needs_reauth: true,
            },
        }
    }
}

impl From<PlanError> for UploadError {
    fn from(err: PlanError) -> Self {
        UploadError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Platform;

    #[test]
    fn test_platform_error_mapping() {
        let err: UploadError = PlatformError::from_response(
            Platform::TikTok,
            429,
            r#"{"error":{"code":"rate_limit_exceeded","message":"slow down"}}"#,
        )
        .into();
        assert_eq!(
            err,
            UploadError::RateLimited(
                "Too many requests. Please wait a moment and try again.".to_string()
            )
        );

        let err: UploadError = PlatformError::transport(Platform::YouTube, "reset").into();
        assert!(matches!(err, UploadError::Transport(_)));

        let err: UploadError = PlatformError::from_response(
            Platform::TikTok,
            401,
            r#"{"error":{"code":"access_token_invalid","message":"bad"}}"#,
        )
        .into();
        assert!(err.is_auth());
        assert!(!err.needs_reauth());
    }

    #[test]
    fn test_token_error_mapping() {
        let err: UploadError = TokenError::NotConnected(Platform::YouTube).into();
        assert_eq!(
            err,
            UploadError::Validation("YouTube account not connected".to_string())
        );

        let err: UploadError = TokenError::NeedsReauth {
            platform: Platform::TikTok,
            reason: "revoked".to_string(),
        }
        .into();
        assert!(err.needs_reauth());
    }
}
