//! 日志系统配置
//!
//! 控制台输出 + 可选的文件持久化。日志文件以启动时间命名，超过大小上限时滚动，
//! 启动时清理超过保留天数的旧文件

use crate::config::LogConfig;
use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "omnipost.";
const LOG_FILE_SUFFIX: &str = ".log";
const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 滚动文件写入器的内部状态
struct RollingState {
    /// 启动时间戳（YYYY-MM-DD-HHMMSS）
    start_timestamp: String,
    log_dir: PathBuf,
    file: Option<File>,
    /// 0 为基础文件，之后每滚动一次加 1
    index: u32,
    max_file_size: u64,
    written: u64,
}

impl RollingState {
    fn file_path(&self) -> PathBuf {
        let name = if self.index == 0 {
            format!("{}{}{}", LOG_FILE_PREFIX, self.start_timestamp, LOG_FILE_SUFFIX)
        } else {
            format!(
                "{}{}_{}{}",
                LOG_FILE_PREFIX, self.start_timestamp, self.index, LOG_FILE_SUFFIX
            )
        };
        self.log_dir.join(name)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())?;
        self.file = Some(file);
        self.written = 0;
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 单条超过上限时也至少写进一个新文件
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.file.take() {
                file.flush()?;
            }
            self.index += 1;
            self.open_current()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

/// 按大小滚动的日志文件写入器
#[derive(Clone)]
pub struct RollingFileWriter {
    state: Arc<Mutex<RollingState>>,
}

impl RollingFileWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut state = RollingState {
            start_timestamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            log_dir,
            file: None,
            index: 0,
            max_file_size,
            written: 0,
        };
        state.open_current()?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// 当前正在写入的文件
    pub fn current_path(&self) -> PathBuf {
        self.state.lock().file_path()
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().write_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 日志系统守卫
///
/// 必须保持存活，否则文件写入线程会退出
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// 环境变量 `RUST_LOG` 优先于配置中的级别；文件层创建失败时回退到仅控制台输出
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(true);

    let writer = if config.enabled {
        fs::create_dir_all(&config.log_dir)
            .and_then(|_| RollingFileWriter::new(config.log_dir.clone(), config.max_file_size))
            .map_err(|e| {
                eprintln!(
                    "创建日志文件失败: {:?}, 错误: {}, 回退到仅控制台输出",
                    config.log_dir, e
                )
            })
            .ok()
    } else {
        None
    };

    let Some(writer) = writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        info!("日志系统初始化完成（仅控制台输出）");
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let removed = cleanup_old_logs(&config.log_dir, config.retention_days);
    if removed > 0 {
        info!("已清理 {} 个过期日志文件", removed);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 删除超过保留天数的日志文件，返回删除数量
///
/// 优先按文件名中的日期判断，无法解析时按修改时间判断
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !filename.starts_with(LOG_FILE_PREFIX) || !filename.ends_with(LOG_FILE_SUFFIX) {
            continue;
        }

        let expired = match date_from_filename(filename) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => expired_by_mtime(&entry, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }
    removed
}

/// omnipost.YYYY-MM-DD[-HHMMSS[_N]].log -> YYYY-MM-DD
fn date_from_filename(filename: &str) -> Option<chrono::NaiveDate> {
    let stem = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    let date = stem.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn expired_by_mtime(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let modified: chrono::DateTime<chrono::Utc> = modified.into();
    chrono::Utc::now().signed_duration_since(modified) > retention
}
