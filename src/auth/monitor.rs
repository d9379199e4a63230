//! 令牌后台监控
//!
//! 定时检查所有已连接账号，距离过期不足阈值时主动刷新，与上传流程互不依赖。
//!
//! 每个平台单独记录连续失败次数和最近一次失败时间：
//! - 失败后等待 `2^min(failures, 5)` 分钟再尝试
//! - 同一账号连续失败达到上限后不再尝试，直到账号更换（重新连接）
//! - 刷新成功或账号更换时计数清零

use super::lifecycle::{TokenManager, TokenState};
use super::types::Platform;
use crate::common::monitor_backoff;
use crate::config::TokenConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 监控策略
#[derive(Debug, Clone)]
pub struct MonitorPolicy {
    /// 检查间隔
    pub interval: Duration,
    /// 距离过期小于该值时刷新
    pub threshold: Duration,
    /// 连续失败上限
    pub max_failures: u32,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self::from(&TokenConfig::default())
    }
}

impl From<&TokenConfig> for MonitorPolicy {
    fn from(config: &TokenConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.monitor_interval_secs),
            threshold: Duration::from_secs(config.monitor_threshold_secs),
            max_failures: config.max_monitor_failures,
        }
    }
}

/// 单个平台的检查结果
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorAction {
    /// 未连接、没有 refresh_token 或没有过期时间
    Skipped,
    /// 距离过期还早
    NotDue,
    /// 处于失败退避窗口内
    BackingOff { retry_in: Duration },
    /// 连续失败次数已达上限，等待重新连接
    GaveUp { failures: u32 },
    /// 刷新成功
    Refreshed,
    /// 本次刷新失败
    Failed { failures: u32, error: String },
}

/// 一次检查的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    pub actions: Vec<(Platform, MonitorAction)>,
}

impl MonitorReport {
    pub fn action(&self, platform: Platform) -> Option<&MonitorAction> {
        self.actions
            .iter()
            .find(|(p, _)| *p == platform)
            .map(|(_, action)| action)
    }
}

#[derive(Debug, Clone)]
struct FailureState {
    count: u32,
    last_failure_ms: i64,
    account_id: String,
}

/// 令牌监控器
pub struct TokenMonitor {
    manager: Arc<TokenManager>,
    policy: MonitorPolicy,
    failures: Mutex<HashMap<Platform, FailureState>>,
}

impl TokenMonitor {
    pub fn new(manager: Arc<TokenManager>, policy: MonitorPolicy) -> Self {
        Self {
            manager,
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// 当前连续失败次数
    pub fn failure_count(&self, platform: Platform) -> u32 {
        self.failures
            .lock()
            .get(&platform)
            .map(|s| s.count)
            .unwrap_or(0)
    }

    /// 检查所有平台
    pub async fn check_now(&self) -> MonitorReport {
        let mut report = MonitorReport::default();
        for platform in Platform::ALL {
            let action = self.check_platform(platform).await;
            debug!("令牌监控 {}: {:?}", platform, action);
            report.actions.push((platform, action));
        }
        report
    }

    async fn check_platform(&self, platform: Platform) -> MonitorAction {
        let Some(account) = self.manager.session().account(platform) else {
            self.failures.lock().remove(&platform);
            return MonitorAction::Skipped;
        };

        let Some(expires_at) = account.expires_at else {
            return MonitorAction::Skipped;
        };
        if !account.can_refresh() {
            return MonitorAction::Skipped;
        }

        let now = self.manager.clock().now_millis();

        // 失败门控
        {
            let mut failures = self.failures.lock();
            if let Some(state) = failures.get(&platform) {
                if state.account_id != account.id {
                    info!("{} 账号已更换，重置刷新失败计数", platform);
                    failures.remove(&platform);
                } else if state.count >= self.policy.max_failures {
                    return MonitorAction::GaveUp {
                        failures: state.count,
                    };
                } else {
                    let gate_ms = monitor_backoff(state.count).as_millis() as i64;
                    let elapsed = now.saturating_sub(state.last_failure_ms);
                    if elapsed < gate_ms {
                        return MonitorAction::BackingOff {
                            retry_in: Duration::from_millis((gate_ms - elapsed) as u64),
                        };
                    }
                }
            }
        }

        let threshold_ms = self.policy.threshold.as_millis() as i64;
        if expires_at.saturating_sub(now) > threshold_ms {
            return MonitorAction::NotDue;
        }

        info!(
            "{} 令牌将在 {} 秒内过期，主动刷新",
            platform,
            expires_at.saturating_sub(now).max(0) / 1000
        );

        match self
            .manager
            .refresh_if_expiring_within(platform, self.policy.threshold)
            .await
        {
            Ok(TokenState::Refreshed(_)) => {
                self.failures.lock().remove(&platform);
                MonitorAction::Refreshed
            }
            // 等锁期间已被其他调用者刷新
            Ok(TokenState::Valid(_)) => {
                self.failures.lock().remove(&platform);
                MonitorAction::NotDue
            }
            Err(e) => {
                let mut failures = self.failures.lock();
                let state = failures.entry(platform).or_insert_with(|| FailureState {
                    count: 0,
                    last_failure_ms: now,
                    account_id: account.id.clone(),
                });
                state.count += 1;
                state.last_failure_ms = self.manager.clock().now_millis();

                if state.count >= self.policy.max_failures {
                    error!(
                        "{} 令牌连续刷新失败 {} 次，停止自动刷新，请重新连接账号: {}",
                        platform, state.count, e
                    );
                } else {
                    warn!(
                        "{} 令牌主动刷新失败 (连续 {} 次): {}",
                        platform, state.count, e
                    );
                }

                MonitorAction::Failed {
                    failures: state.count,
                    error: e.to_string(),
                }
            }
        }
    }

    /// 启动后台监控：立即检查一次，之后每隔 `interval` 检查，直到取消
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                "令牌监控已启动: 间隔 {:?}, 阈值 {:?}",
                self.policy.interval, self.policy.threshold
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("令牌监控已停止");
                        break;
                    }
                    _ = interval.tick() => {
                        self.check_now().await;
                    }
                }
            }
        })
    }
}
