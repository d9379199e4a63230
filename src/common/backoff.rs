//! 指数退避计算
//!
//! 纯函数，不依赖定时器，方便单独测试

use rand::Rng;
use std::time::Duration;

/// 第 `attempt` 次（从 0 开始）重试前的基础延迟: `base * 2^attempt`
///
/// 溢出时饱和到 `u64::MAX`
pub fn exponential_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    2u64.checked_pow(attempt)
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
}

/// 带指定抖动的退避延迟: `base * 2^attempt + jitter`
pub fn backoff_delay_with_jitter(base_ms: u64, attempt: u32, jitter_ms: u64) -> Duration {
    Duration::from_millis(exponential_delay_ms(base_ms, attempt).saturating_add(jitter_ms))
}

/// 带随机抖动的退避延迟
///
/// 抖动在 `[0, max_jitter_ms)` 内均匀分布，防止多个客户端同时重试
pub fn backoff_delay(base_ms: u64, attempt: u32, max_jitter_ms: u64) -> Duration {
    let jitter = if max_jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..max_jitter_ms)
    };
    backoff_delay_with_jitter(base_ms, attempt, jitter)
}

/// 令牌监控的失败退避窗口: `2^min(failures, 5)` 分钟
pub fn monitor_backoff(failures: u32) -> Duration {
    Duration::from_secs(60 * exponential_delay_ms(1, failures.min(5)))
}
