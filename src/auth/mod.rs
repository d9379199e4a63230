// 认证模块
//
// 平台账号、会话上下文、令牌刷新与后台监控

pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod session;
pub mod store;
pub mod types;

pub use error::TokenError;
pub use lifecycle::{TokenManager, TokenPolicy, TokenRefresher, TokenState};
pub use monitor::{MonitorAction, MonitorPolicy, MonitorReport, TokenMonitor};
pub use session::Session;
pub use store::{AccountStore, JsonFileAccountStore, MemoryAccountStore};
pub use types::{Account, AccountProfile, Platform, RefreshedTokens};
