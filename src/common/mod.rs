//! 公共模块
//!
//! 提供跨模块使用的通用组件

mod backoff;
mod clock;

pub use backoff::{
    backoff_delay, backoff_delay_with_jitter, exponential_delay_ms, monitor_backoff,
};
pub use clock::{Clock, ManualClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
