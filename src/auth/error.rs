// 令牌错误定义

use super::types::Platform;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TokenError {
    /// 平台账号未连接
    #[error("{} account not connected", .0.display_name())]
    NotConnected(Platform),

    /// 令牌已失效且无法自动刷新，需要用户重新授权
    #[error("{} authorization expired, please reconnect: {reason}", .platform.display_name())]
    NeedsReauth { platform: Platform, reason: String },

    /// 重试耗尽后仍刷新失败
    #[error("{} token refresh failed after {attempts} attempts: {message}", .platform.display_name())]
    RefreshFailed {
        platform: Platform,
        attempts: u32,
        message: String,
    },
}

impl TokenError {
    pub fn platform(&self) -> Platform {
        match self {
            TokenError::NotConnected(platform)
            | TokenError::NeedsReauth { platform, .. }
            | TokenError::RefreshFailed { platform, .. } => *platform,
        }
    }

    /// 是否需要用户重新授权
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            TokenError::NeedsReauth { .. } | TokenError::RefreshFailed { .. }
        )
    }
}
