//! 令牌生命周期管理
//!
//! - 判断令牌是否即将过期（提前 1 分钟）
//! - 调用平台令牌接口刷新，失败按指数退避 + 随机抖动重试
//! - 刷新结果合并进会话并持久化
//!
//! 同一平台的刷新通过平台级互斥锁串行化：后台监控和上传前检查同时触发时，
//! 后到者拿到锁后重新读取账号，发现令牌已是新的就直接返回，不会重复刷新。

use super::error::TokenError;
use super::session::Session;
use super::types::{Account, Platform, RefreshedTokens};
use crate::common::{backoff_delay, Clock, Sleeper};
use crate::config::TokenConfig;
use crate::platform::PlatformError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 平台令牌接口
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// 用 refresh_token 换取新的访问令牌（单次请求，不重试）
    async fn refresh_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, PlatformError>;
}

/// 刷新策略
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    /// 最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    /// 退避基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 随机抖动上限（毫秒）
    pub jitter_ms: u64,
    /// 提前视为过期的时间（毫秒）
    pub expiry_skew_ms: i64,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self::from(&TokenConfig::default())
    }
}

impl From<&TokenConfig> for TokenPolicy {
    fn from(config: &TokenConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            jitter_ms: config.jitter_ms,
            expiry_skew_ms: config.expiry_skew_ms,
        }
    }
}

/// 令牌检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// 现有令牌仍然有效
    Valid(String),
    /// 刚刚刷新得到的新令牌
    Refreshed(String),
}

impl TokenState {
    pub fn access_token(&self) -> &str {
        match self {
            TokenState::Valid(token) | TokenState::Refreshed(token) => token,
        }
    }

    pub fn into_access_token(self) -> String {
        match self {
            TokenState::Valid(token) | TokenState::Refreshed(token) => token,
        }
    }
}

/// 令牌生命周期管理器
pub struct TokenManager {
    session: Arc<Session>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    policy: TokenPolicy,
    youtube_lock: Mutex<()>,
    tiktok_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        session: Arc<Session>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            session,
            refresher,
            clock,
            sleeper,
            policy,
            youtube_lock: Mutex::new(()),
            tiktok_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn lock_for(&self, platform: Platform) -> &Mutex<()> {
        match platform {
            Platform::YouTube => &self.youtube_lock,
            Platform::TikTok => &self.tiktok_lock,
        }
    }

    /// `now >= expires_at - skew` 即视为过期
    pub fn is_expired(&self, expires_at: i64) -> bool {
        self.clock.now_millis() >= expires_at.saturating_sub(self.policy.expiry_skew_ms)
    }

    /// 调用令牌接口刷新（带退避重试）
    ///
    /// 网络异常与平台错误响应一样参与重试；全部失败后返回最后一次的错误信息。
    /// 这里只负责换取令牌，不修改会话
    pub async fn refresh(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, TokenError> {
        let attempts = self.policy.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.refresher.refresh_token(platform, refresh_token).await {
                Ok(tokens) => {
                    info!("{} 令牌刷新成功 (第 {} 次尝试)", platform, attempt + 1);
                    return Ok(tokens);
                }
                Err(e) => {
                    last_error = e.to_string();

                    if attempt + 1 < attempts {
                        let delay = backoff_delay(
                            self.policy.base_delay_ms,
                            attempt,
                            self.policy.jitter_ms,
                        );
                        warn!(
                            "{} 令牌刷新失败 (第 {}/{} 次): {}，{}ms 后重试",
                            platform,
                            attempt + 1,
                            attempts,
                            last_error,
                            delay.as_millis()
                        );
                        self.sleeper.sleep(delay).await;
                    } else {
                        warn!(
                            "{} 令牌刷新失败 (第 {}/{} 次): {}",
                            platform,
                            attempt + 1,
                            attempts,
                            last_error
                        );
                    }
                }
            }
        }

        Err(TokenError::RefreshFailed {
            platform,
            attempts,
            message: last_error,
        })
    }

    /// 获取可用的访问令牌，必要时刷新
    ///
    /// - 没有 `expires_at`，或尚未过期：原样返回
    /// - 已过期且没有 refresh_token：`NeedsReauth`
    /// - 已过期：刷新、合并、持久化后返回新令牌；刷新失败为 `NeedsReauth`
    pub async fn ensure_valid(&self, platform: Platform) -> Result<String, TokenError> {
        self.refresh_when(platform, |account| {
            account
                .expires_at
                .map(|expires_at| self.is_expired(expires_at))
                .unwrap_or(false)
        })
        .await
        .map(TokenState::into_access_token)
    }

    /// 无条件刷新
    ///
    /// 上传过程中平台返回令牌无效时使用
    pub async fn force_refresh(&self, platform: Platform) -> Result<String, TokenError> {
        self.refresh_when(platform, |_| true)
            .await
            .map(TokenState::into_access_token)
    }

    /// 距离过期不足 `window` 时刷新
    pub async fn refresh_if_expiring_within(
        &self,
        platform: Platform,
        window: Duration,
    ) -> Result<TokenState, TokenError> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        self.refresh_when(platform, |account| {
            account
                .expires_at
                .map(|expires_at| expires_at.saturating_sub(self.clock.now_millis()) <= window_ms)
                .unwrap_or(false)
        })
        .await
    }

    async fn refresh_when<F>(
        &self,
        platform: Platform,
        needs_refresh: F,
    ) -> Result<TokenState, TokenError>
    where
        F: Fn(&Account) -> bool,
    {
        let _guard = self.lock_for(platform).lock().await;

        // 拿到锁之后再读账号，前一个持锁者可能已经刷新过
        let account = self
            .session
            .account(platform)
            .ok_or(TokenError::NotConnected(platform))?;

        if !needs_refresh(&account) {
            debug!("{} 令牌仍然有效", platform);
            return Ok(TokenState::Valid(account.access_token));
        }

        let Some(refresh_token) = account.refresh_token.clone().filter(|t| !t.is_empty()) else {
            warn!("{} 令牌已过期且没有 refresh_token", platform);
            return Err(TokenError::NeedsReauth {
                platform,
                reason: "no refresh token available".to_string(),
            });
        };

        let tokens = match self.refresh(platform, &refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                return Err(TokenError::NeedsReauth {
                    platform,
                    reason: e.to_string(),
                })
            }
        };

        match self.session.apply_refresh(platform, &account.id, &tokens) {
            Ok(Some(updated)) => Ok(TokenState::Refreshed(updated.access_token)),
            Ok(None) => Err(TokenError::NotConnected(platform)),
            Err(e) => {
                // 持久化失败不影响本次使用，内存中的会话已经更新
                warn!("{} 刷新后的令牌保存失败: {:#}", platform, e);
                Ok(TokenState::Refreshed(tokens.access_token))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::store::MemoryAccountStore;
    use crate::auth::types::AccountProfile;
    use crate::common::{ManualClock, RecordingSleeper};
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按预设顺序返回结果的刷新接口
    #[derive(Default)]
    pub(crate) struct ScriptedRefresher {
        results: SyncMutex<VecDeque<Result<RefreshedTokens, PlatformError>>>,
        pub calls: AtomicUsize,
        pub delay: Option<Duration>,
    }

    impl ScriptedRefresher {
        pub fn new(results: Vec<Result<RefreshedTokens, PlatformError>>) -> Self {
            Self {
                results: SyncMutex::new(results.into()),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for ScriptedRefresher {
        async fn refresh_token(
            &self,
            platform: Platform,
            _refresh_token: &str,
        ) -> Result<RefreshedTokens, PlatformError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.results.lock().pop_front().unwrap_or_else(|| {
                Ok(RefreshedTokens {
                    access_token: format!("{}-token-{}", platform, n + 1),
                    refresh_token: None,
                    expires_at: Some(i64::MAX / 2),
                })
            })
        }
    }

    pub(crate) fn tokens(access: &str, expires_at: i64) -> RefreshedTokens {
        RefreshedTokens {
            access_token: access.to_string(),
            refresh_token: None,
            expires_at: Some(expires_at),
        }
    }

    pub(crate) fn api_error(message: &str) -> PlatformError {
        PlatformError::Api {
            platform: Platform::YouTube,
            status: 400,
            code: Some("invalid_grant".to_string()),
            message: message.to_string(),
        }
    }

    pub(crate) fn youtube_account(refresh: Option<&str>, expires_at: Option<i64>) -> Account {
        Account {
            id: "UC1".to_string(),
            access_token: "old-access".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            profile: AccountProfile::YouTube {
                channel_id: "UC1".to_string(),
                title: "Channel".to_string(),
                description: None,
                thumbnail: None,
                subscriber_count: None,
            },
        }
    }

    struct Fixture {
        manager: TokenManager,
        store: Arc<MemoryAccountStore>,
        sleeper: Arc<RecordingSleeper>,
        clock: Arc<ManualClock>,
    }

    fn fixture(account: Option<Account>, refresher: Arc<ScriptedRefresher>) -> Fixture {
        let store = Arc::new(match account {
            Some(account) => MemoryAccountStore::with_account(account),
            None => MemoryAccountStore::new(),
        });
        let session = Arc::new(Session::restore(store.clone()));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let sleeper = Arc::new(RecordingSleeper::with_clock(clock.clone()));
        let manager = TokenManager::new(
            session,
            refresher,
            clock.clone(),
            sleeper.clone(),
            TokenPolicy::default(),
        );
        Fixture {
            manager,
            store,
            sleeper,
            clock,
        }
    }

    #[test]
    fn test_is_expired_boundary() {
        let f = fixture(None, Arc::new(ScriptedRefresher::default()));
        let now = f.clock.now_millis();

        // now == t - 60000 时已过期
        assert!(f.manager.is_expired(now + 60_000));
        assert!(!f.manager.is_expired(now + 60_001));
        assert!(f.manager.is_expired(now + 59_999));
        assert!(f.manager.is_expired(now - 1));
    }

    #[tokio::test]
    async fn test_refresh_retries_with_backoff() {
        let refresher = Arc::new(ScriptedRefresher::new(vec![
            Err(api_error("boom 1")),
            Err(PlatformError::transport(Platform::YouTube, "connection reset")),
            Ok(tokens("new", 5)),
        ]));
        let f = fixture(None, refresher.clone());

        let result = f.manager.refresh(Platform::YouTube, "r").await.unwrap();
        assert_eq!(result.access_token, "new");
        assert_eq!(refresher.calls(), 3);

        let sleeps = f.sleeper.calls();
        assert_eq!(sleeps.len(), 2);
        for (k, delay) in sleeps.iter().enumerate() {
            let floor = 1000u128 * 2u128.pow(k as u32);
            let ms = delay.as_millis();
            assert!(ms >= floor && ms < floor + 1000, "attempt {}: {}ms", k, ms);
        }
    }

    #[tokio::test]
    async fn test_refresh_gives_up_after_max_retries() {
        let results = (0..6)
            .map(|i| Err(api_error(&format!("failure {}", i))))
            .collect();
        let refresher = Arc::new(ScriptedRefresher::new(results));
        let f = fixture(None, refresher.clone());

        let err = f.manager.refresh(Platform::YouTube, "r").await.unwrap_err();
        assert_eq!(refresher.calls(), 6);
        assert_eq!(f.sleeper.calls().len(), 5);
        match err {
            TokenError::RefreshFailed {
                attempts, message, ..
            } => {
                assert_eq!(attempts, 6);
                assert!(message.contains("failure 5"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ensure_valid_returns_current_token() {
        let refresher = Arc::new(ScriptedRefresher::default());

        // 无过期时间
        let f = fixture(Some(youtube_account(Some("r"), None)), refresher.clone());
        assert_eq!(
            f.manager.ensure_valid(Platform::YouTube).await.unwrap(),
            "old-access"
        );

        // 尚未过期
        let f = fixture(
            Some(youtube_account(Some("r"), Some(1_000_000 + 3_600_000))),
            refresher.clone(),
        );
        assert_eq!(
            f.manager.ensure_valid(Platform::YouTube).await.unwrap(),
            "old-access"
        );
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_valid_refreshes_and_persists() {
        let refresher = Arc::new(ScriptedRefresher::new(vec![Ok(tokens("fresh", 9_999_999))]));
        let f = fixture(
            Some(youtube_account(Some("keep-me"), Some(1_000_000 + 30_000))),
            refresher.clone(),
        );

        let token = f.manager.ensure_valid(Platform::YouTube).await.unwrap();
        assert_eq!(token, "fresh");

        let saved = f.store.get(Platform::YouTube).unwrap();
        assert_eq!(saved.access_token, "fresh");
        assert_eq!(saved.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(saved.expires_at, Some(9_999_999));
    }

    #[tokio::test]
    async fn test_ensure_valid_without_refresh_token_needs_reauth() {
        let refresher = Arc::new(ScriptedRefresher::default());
        let f = fixture(Some(youtube_account(None, Some(10))), refresher.clone());

        let err = f.manager.ensure_valid(Platform::YouTube).await.unwrap_err();
        assert!(matches!(err, TokenError::NeedsReauth { .. }));
        assert!(err.needs_reauth());
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_valid_refresh_failure_needs_reauth() {
        let results = (0..6).map(|_| Err(api_error("revoked"))).collect();
        let refresher = Arc::new(ScriptedRefresher::new(results));
        let f = fixture(Some(youtube_account(Some("r"), Some(10))), refresher);

        let err = f.manager.ensure_valid(Platform::YouTube).await.unwrap_err();
        assert!(err.needs_reauth());
        assert_eq!(f.store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_valid_not_connected() {
        let f = fixture(None, Arc::new(ScriptedRefresher::default()));
        assert_eq!(
            f.manager.ensure_valid(Platform::TikTok).await.unwrap_err(),
            TokenError::NotConnected(Platform::TikTok)
        );
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_serialized() {
        let refresher = Arc::new(ScriptedRefresher {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let f = fixture(Some(youtube_account(Some("r"), Some(10))), refresher.clone());
        let manager = Arc::new(f.manager);

        let a = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_valid(Platform::YouTube).await })
        };
        let b = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_valid(Platform::YouTube).await })
        };

        let token_a = a.await.unwrap().unwrap();
        let token_b = b.await.unwrap().unwrap();

        // 第二个调用者拿到锁时令牌已经是新的
        assert_eq!(refresher.calls(), 1);
        assert_eq!(token_a, token_b);
    }

    #[tokio::test]
    async fn test_refresh_if_expiring_within() {
        let refresher = Arc::new(ScriptedRefresher::default());
        // 10 分钟后过期
        let f = fixture(
            Some(youtube_account(Some("r"), Some(1_000_000 + 10 * 60_000))),
            refresher.clone(),
        );

        let state = f
            .manager
            .refresh_if_expiring_within(Platform::YouTube, Duration::from_secs(5 * 60))
            .await
            .unwrap();
        assert_eq!(state, TokenState::Valid("old-access".to_string()));

        let state = f
            .manager
            .refresh_if_expiring_within(Platform::YouTube, Duration::from_secs(30 * 60))
            .await
            .unwrap();
        assert!(matches!(state, TokenState::Refreshed(_)));
        assert_eq!(refresher.calls(), 1);
    }
}
