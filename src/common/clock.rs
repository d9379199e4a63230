//! 时钟与休眠抽象
//!
//! 令牌过期判断、退避等待和状态轮询都依赖"当前时间"和"等待一段时间"，
//! 通过注入这两个 trait，测试可以使用手动时钟而不必真的等待

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 毫秒级时钟
pub trait Clock: Send + Sync {
    /// 当前 Unix 时间戳（毫秒）
    fn now_millis(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// 手动时钟
///
/// 时间只在调用 `set` / `advance` 时变化
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Duration) {
        self.now_ms
            .fetch_add(delta.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// 异步休眠
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 基于 tokio 定时器的休眠
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 只记录请求的休眠时长，立即返回
///
/// 可选绑定一个 `ManualClock`，每次休眠时推进该时钟
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            clock: Some(clock),
        }
    }

    /// 已记录的休眠时长（按调用顺序）
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls.lock().push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
    }
}
