// 上传管理器
//
// 负责一次上传的完整生命周期：
// - 同步校验前置条件（标题、视频文件、账号已连接）
// - 创建记录并在后台任务中驱动平台驱动
// - 把驱动回调转换为记录的进度和状态
// - 取消 / 重试 / 重新提交
//
// 每次尝试都有自己的取消令牌和尝试序号，旧尝试的回调不会影响新尝试

use super::chunk::ChunkPlan;
use super::driver::{
    DriverObserver, TikTokDriver, UploadDriver, UploadJob, UploadOutcome, YouTubeDriver,
};
use super::error::UploadError;
use super::events::UploadEvent;
use super::store::UploadProgressStore;
use super::task::{UploadRecord, UploadStatus};
use super::video::{UploadMetadata, VideoFile};
use crate::auth::{Platform, TokenManager};
use crate::common::Sleeper;
use crate::config::UploadConfig;
use crate::platform::PlatformClients;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 一次上传请求（用于重新提交）
#[derive(Debug, Clone)]
struct UploadRequest {
    platform: Platform,
    video: VideoFile,
    metadata: UploadMetadata,
}

/// 已启动的上传
#[derive(Debug)]
pub struct StartedUpload {
    pub id: String,
    /// 尝试结束后返回记录的最终状态
    pub handle: JoinHandle<Option<UploadRecord>>,
}

pub struct UploadManager {
    store: Arc<UploadProgressStore>,
    tokens: Arc<TokenManager>,
    drivers: HashMap<Platform, Arc<dyn UploadDriver>>,
    requests: DashMap<String, UploadRequest>,
    /// upload_id -> (attempt, 取消令牌)
    cancel_tokens: DashMap<String, (u32, CancellationToken)>,
    /// 单次上传的整体超时
    overall_timeout: Duration,
}

impl UploadManager {
    pub fn new(
        store: Arc<UploadProgressStore>,
        tokens: Arc<TokenManager>,
        drivers: Vec<Arc<dyn UploadDriver>>,
        overall_timeout: Duration,
    ) -> Self {
        let drivers = drivers
            .into_iter()
            .map(|driver| (driver.platform(), driver))
            .collect();

        Self {
            store,
            tokens,
            drivers,
            requests: DashMap::new(),
            cancel_tokens: DashMap::new(),
            overall_timeout,
        }
    }

    /// 使用真实平台客户端创建
    pub fn with_clients(
        clients: &PlatformClients,
        tokens: Arc<TokenManager>,
        sleeper: Arc<dyn Sleeper>,
        config: &UploadConfig,
    ) -> Self {
        let store = Arc::new(UploadProgressStore::new(Duration::from_millis(
            config.progress_throttle_ms,
        )));
        let drivers: Vec<Arc<dyn UploadDriver>> = vec![
            Arc::new(YouTubeDriver::new(
                clients.youtube.clone(),
                config.default_category.clone(),
            )),
            Arc::new(TikTokDriver::from_config(
                clients.tiktok.clone(),
                sleeper,
                config,
            )),
        ];
        Self::new(store, tokens, drivers, config.overall_timeout())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.store.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<UploadRecord> {
        self.store.get(id)
    }

    pub fn snapshot(&self) -> Vec<UploadRecord> {
        self.store.snapshot()
    }

    fn check_preconditions(
        &self,
        platform: Platform,
        video: &VideoFile,
        metadata: &UploadMetadata,
    ) -> Result<(), UploadError> {
        if video.size == 0 || !video.path.is_file() {
            return Err(UploadError::Validation(format!(
                "Please select a video file ({} is missing or empty)",
                video.path.display()
            )));
        }
        if metadata.title.trim().is_empty() {
            return Err(UploadError::Validation(
                "Video title is required".to_string(),
            ));
        }
        if !self.drivers.contains_key(&platform) {
            return Err(UploadError::Validation(format!(
                "{} uploads are not available",
                platform.display_name()
            )));
        }
        if !self.tokens.session().is_connected(platform) {
            return Err(UploadError::Validation(format!(
                "Please connect your {} account first",
                platform.display_name()
            )));
        }
        Ok(())
    }

    /// 开始上传
    ///
    /// 前置条件不满足时直接返回错误，不创建记录
    pub fn start(
        self: &Arc<Self>,
        platform: Platform,
        video: VideoFile,
        metadata: UploadMetadata,
    ) -> Result<StartedUpload, UploadError> {
        self.check_preconditions(platform, &video, &metadata)?;

        let record = UploadRecord::new(platform, video.name.clone());
        let id = record.id.clone();
        info!(
            "创建上传: id={}, platform={}, file={}, size={}",
            id, platform, video.name, video.size
        );

        self.store.insert(record);
        self.requests.insert(
            id.clone(),
            UploadRequest {
                platform,
                video,
                metadata,
            },
        );

        let handle = self.launch(id.clone(), 1);
        Ok(StartedUpload { id, handle })
    }

    /// 取消上传（仅上传中）
    ///
    /// 记录立即进入 cancelled，正在进行的请求不保证被中断，但之后的回调都会被忽略
    pub fn cancel(&self, id: &str) -> Result<UploadRecord, UploadError> {
        let record = self.store.cancel(id)?;
        if let Some(entry) = self.cancel_tokens.get(id) {
            entry.value().1.cancel();
        }
        info!("上传已取消: id={}", id);
        Ok(record)
    }

    /// 失败的上传重置为 pending（同一个 ID）
    pub fn retry(&self, id: &str) -> Result<UploadRecord, UploadError> {
        let record = self.store.retry(id)?;
        info!("上传重置为等待: id={}, attempt={}", id, record.attempt);
        Ok(record)
    }

    /// 用原请求重新启动一个 pending 的上传
    pub fn resubmit(self: &Arc<Self>, id: &str) -> Result<StartedUpload, UploadError> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        if record.status != UploadStatus::Pending {
            return Err(UploadError::InvalidTransition {
                action: "resubmit",
                status: record.status,
            });
        }

        let request = self
            .requests
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        self.check_preconditions(request.platform, &request.video, &request.metadata)?;

        let handle = self.launch(id.to_string(), record.attempt);
        Ok(StartedUpload {
            id: id.to_string(),
            handle,
        })
    }

    /// 清除已完成的记录
    pub fn clear_completed(&self) -> usize {
        let removed = self.store.clear_completed();
        self.prune_requests();
        removed
    }

    /// 清除所有非活动记录（已完成、失败、已取消、等待中）
    pub fn clear(&self) -> usize {
        let removed = self.store.clear();
        self.prune_requests();
        removed
    }

    /// 删除单条非活动记录
    pub fn remove(&self, id: &str) -> Result<UploadRecord, UploadError> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        if record.status.is_active() {
            return Err(UploadError::InvalidTransition {
                action: "remove",
                status: record.status,
            });
        }
        let removed = self
            .store
            .remove(id)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
        self.requests.remove(id);
        Ok(removed)
    }

    fn prune_requests(&self) {
        self.requests.retain(|id, _| self.store.get(id).is_some());
    }

    fn launch(self: &Arc<Self>, id: String, attempt: u32) -> JoinHandle<Option<UploadRecord>> {
        let cancel = CancellationToken::new();
        self.cancel_tokens
            .insert(id.clone(), (attempt, cancel.clone()));

        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run_attempt(id, attempt, cancel).await })
    }

    async fn run_attempt(
        &self,
        id: String,
        attempt: u32,
        cancel: CancellationToken,
    ) -> Option<UploadRecord> {
        let request = self.requests.get(&id).map(|r| r.clone())?;

        if self.store.mark_uploading(&id, attempt) {
            let drive = self.drive(&id, attempt, &request, &cancel);
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                r = tokio::time::timeout(self.overall_timeout, drive) => {
                    r.unwrap_or_else(|_| {
                        Err(UploadError::Timeout(format!(
                            "Upload timed out after {} seconds",
                            self.overall_timeout.as_secs()
                        )))
                    })
                }
            };
            self.finish_attempt(&id, attempt, result);
        }

        self.cancel_tokens.remove_if(&id, |_, (a, _)| *a == attempt);
        self.store.get(&id)
    }

    fn finish_attempt(&self, id: &str, attempt: u32, result: Result<UploadOutcome, UploadError>) {
        match result {
            Ok(outcome) => {
                if self
                    .store
                    .mark_completed(id, attempt, outcome.video_id, outcome.video_url)
                {
                    info!("上传完成: id={}", id);
                }
            }
            Err(UploadError::Cancelled) => {
                info!("上传尝试已停止（取消）: id={}, attempt={}", id, attempt);
            }
            Err(e) => {
                error!("上传失败: id={}, attempt={}, error={}", id, attempt, e);
                self.store
                    .mark_failed(id, attempt, e.to_string(), e.needs_reauth());
            }
        }
    }

    /// 一次尝试：获取令牌 -> 规划分片 -> 调用驱动
    ///
    /// 驱动报告授权错误且账号可刷新时，强制刷新一次令牌后整体重跑一次。
    /// 已进入平台处理阶段时不再重跑，否则会重复发布
    async fn drive(
        &self,
        id: &str,
        attempt: u32,
        request: &UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let platform = request.platform;
        let driver = self.drivers.get(&platform).ok_or_else(|| {
            UploadError::Validation(format!(
                "{} uploads are not available",
                platform.display_name()
            ))
        })?;

        let access_token = self.tokens.ensure_valid(platform).await?;
        let plan = ChunkPlan::for_platform(platform, request.video.size)?;
        let username = self
            .tokens
            .session()
            .account(platform)
            .and_then(|a| a.username().map(str::to_string));

        let mut job = UploadJob {
            upload_id: id.to_string(),
            access_token,
            video: request.video.clone(),
            metadata: request.metadata.clone(),
            plan,
            username,
        };
        let observer = RecordObserver {
            store: &self.store,
            upload_id: id,
            attempt,
            platform,
            processing: AtomicBool::new(false),
        };

        let err = match driver.upload(&job, &observer, cancel).await {
            Err(e) if e.is_auth() => e,
            other => return other,
        };

        let can_refresh = self
            .tokens
            .session()
            .account(platform)
            .map(|a| a.can_refresh())
            .unwrap_or(false);
        if observer.reached_processing() {
            warn!(
                "平台处理阶段授权失效，不重新上传: id={}, error={}",
                id, err
            );
            return Err(UploadError::Auth {
                message: err.to_string(),
                needs_reauth: !can_refresh,
            });
        }
        if !can_refresh {
            return Err(UploadError::Auth {
                message: err.to_string(),
                needs_reauth: true,
            });
        }

        warn!(
            "上传遇到授权错误，强制刷新令牌后重试: id={}, error={}",
            id, err
        );
        job.access_token = self.tokens.force_refresh(platform).await?;

        match driver.upload(&job, &observer, cancel).await {
            Err(UploadError::Auth { message, .. }) => Err(UploadError::Auth {
                message,
                needs_reauth: true,
            }),
            other => other,
        }
    }
}

/// 把驱动回调写入进度存储
struct RecordObserver<'a> {
    store: &'a UploadProgressStore,
    upload_id: &'a str,
    attempt: u32,
    platform: Platform,
    /// 驱动是否已回报进入处理阶段
    processing: AtomicBool,
}

impl RecordObserver<'_> {
    fn reached_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }
}

impl DriverObserver for RecordObserver<'_> {
    fn on_chunk_uploaded(&self, uploaded_bytes: u64, total_bytes: u64) {
        let progress = if total_bytes == 0 {
            100.0
        } else {
            uploaded_bytes as f64 / total_bytes as f64 * 100.0
        };
        let message = format!("Uploaded {:.1} MB", uploaded_bytes as f64 / BYTES_PER_MB);
        self.store
            .report_progress(self.upload_id, self.attempt, progress, Some(message));
    }

    fn on_processing(&self) {
        self.processing.store(true, Ordering::SeqCst);
        let message = format!("Processing on {}", self.platform.display_name());
        self.store
            .mark_processing(self.upload_id, self.attempt, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::lifecycle::tests::{youtube_account, ScriptedRefresher};
    use crate::auth::{MemoryAccountStore, Session, TokenPolicy};
    use crate::common::{ManualClock, RecordingSleeper};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::sync::Notify;

    /// 按预设结果返回的驱动
    #[derive(Default)]
    struct FakeDriver {
        results: Mutex<VecDeque<Result<UploadOutcome, UploadError>>>,
        tokens_seen: Mutex<Vec<String>>,
        /// 设置后在回报进度（和进入处理阶段）后等待通知
        gate: Option<Arc<Notify>>,
        processing: bool,
    }

    impl FakeDriver {
        fn with_results(results: Vec<Result<UploadOutcome, UploadError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl UploadDriver for FakeDriver {
        fn platform(&self) -> Platform {
            Platform::YouTube
        }

        async fn upload(
            &self,
            job: &UploadJob,
            observer: &dyn DriverObserver,
            _cancel: &CancellationToken,
        ) -> Result<UploadOutcome, UploadError> {
            self.tokens_seen.lock().push(job.access_token.clone());
            let total = job.plan.total_bytes;
            observer.on_chunk_uploaded(total / 2, total);

            if self.processing {
                observer.on_processing();
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let next = self.results.lock().pop_front();
            next.unwrap_or_else(|| {
                Ok(UploadOutcome {
                    video_id: "vid".to_string(),
                    video_url: Some("https://www.youtube.com/watch?v=vid".to_string()),
                })
            })
        }
    }

    struct Fixture {
        manager: Arc<UploadManager>,
        driver: Arc<FakeDriver>,
        refresher: Arc<ScriptedRefresher>,
        _file: NamedTempFile,
        video: VideoFile,
    }

    fn fixture_with(
        account: Option<crate::auth::Account>,
        driver: FakeDriver,
        overall_timeout: Duration,
    ) -> Fixture {
        let store = Arc::new(match account {
            Some(account) => MemoryAccountStore::with_account(account),
            None => MemoryAccountStore::new(),
        });
        let session = Arc::new(Session::restore(store));
        let clock = Arc::new(ManualClock::new(1_000_000));
        let refresher = Arc::new(ScriptedRefresher::default());
        let tokens = Arc::new(TokenManager::new(
            session,
            refresher.clone(),
            clock.clone(),
            Arc::new(RecordingSleeper::with_clock(clock)),
            TokenPolicy::default(),
        ));

        let driver = Arc::new(driver);
        let manager = Arc::new(UploadManager::new(
            Arc::new(UploadProgressStore::new(Duration::ZERO)),
            tokens,
            vec![driver.clone() as Arc<dyn UploadDriver>],
            overall_timeout,
        ));

        let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        file.write_all(&vec![7u8; 4 * 1024 * 1024]).unwrap();
        file.flush().unwrap();
        let video = VideoFile::from_path(file.path()).unwrap();

        Fixture {
            manager,
            driver,
            refresher,
            _file: file,
            video,
        }
    }

    fn fixture(driver: FakeDriver) -> Fixture {
        fixture_with(
            Some(youtube_account(Some("refresh"), Some(i64::MAX / 2))),
            driver,
            Duration::from_secs(30),
        )
    }

    async fn wait_for_status(manager: &UploadManager, id: &str, status: UploadStatus) {
        for _ in 0..500 {
            if manager.get(id).map(|r| r.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("upload {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_start_completes() {
        let f = fixture(FakeDriver::default());
        let mut rx = f.manager.subscribe();

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let record = started.handle.await.unwrap().unwrap();

        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(record.video_id.as_deref(), Some("vid"));
        assert_eq!(record.progress, 100.0);
        assert_eq!(*f.driver.tokens_seen.lock(), vec!["old-access".to_string()]);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, UploadEvent::Created { .. }));
    }

    #[tokio::test]
    async fn test_progress_message() {
        let gate = Arc::new(Notify::new());
        let f = fixture(FakeDriver {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        for _ in 0..500 {
            if f.manager.get(&started.id).unwrap().progress > 0.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let record = f.manager.get(&started.id).unwrap();
        assert_eq!(record.status, UploadStatus::Uploading);
        assert_eq!(record.progress, 50.0);
        assert_eq!(record.message.as_deref(), Some("Uploaded 2.0 MB"));

        gate.notify_one();
        started.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_creates_no_record() {
        let f = fixture_with(None, FakeDriver::default(), Duration::from_secs(30));

        let err = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));

        let f = fixture(FakeDriver::default());
        let err = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("  "))
            .unwrap_err();
        assert_eq!(err, UploadError::Validation("Video title is required".to_string()));

        let err = f
            .manager
            .start(Platform::TikTok, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));

        assert!(f.manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_expired_without_refresh_needs_reauth() {
        let f = fixture_with(
            Some(youtube_account(None, Some(0))),
            FakeDriver::default(),
            Duration::from_secs(30),
        );

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let record = started.handle.await.unwrap().unwrap();

        assert_eq!(record.status, UploadStatus::Failed);
        assert!(record.needs_reauth);
        assert!(f.driver.tokens_seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_auth_error_forces_one_refresh() {
        let f = fixture(FakeDriver::with_results(vec![Err(UploadError::Auth {
            message: "Invalid or expired access token. Please reconnect your account."
                .to_string(),
            needs_reauth: false,
        })]));

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let record = started.handle.await.unwrap().unwrap();

        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(f.refresher.calls(), 1);
        assert_eq!(
            *f.driver.tokens_seen.lock(),
            vec!["old-access".to_string(), "youtube-token-1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_auth_error_while_processing_does_not_reupload() {
        let f = fixture(FakeDriver {
            processing: true,
            ..FakeDriver::with_results(vec![Err(UploadError::Auth {
                message: "access_token_invalid".to_string(),
                needs_reauth: false,
            })])
        });
        let mut rx = f.manager.subscribe();

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let record = started.handle.await.unwrap().unwrap();

        assert_eq!(record.status, UploadStatus::Failed);
        assert!(record.video_id.is_none());
        assert_eq!(f.driver.tokens_seen.lock().len(), 1);
        assert_eq!(f.refresher.calls(), 0);

        let mut transitions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let UploadEvent::StatusChanged {
                old_status,
                new_status,
                ..
            } = event
            {
                transitions.push(format!("{}->{}", old_status, new_status));
            }
        }
        assert_eq!(
            transitions,
            vec![
                "pending->uploading",
                "uploading->processing",
                "processing->failed"
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_auth_error_needs_reauth() {
        let auth_err = || UploadError::Auth {
            message: "denied".to_string(),
            needs_reauth: false,
        };
        let f = fixture(FakeDriver::with_results(vec![Err(auth_err()), Err(auth_err())]));

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let record = started.handle.await.unwrap().unwrap();

        assert_eq!(record.status, UploadStatus::Failed);
        assert!(record.needs_reauth);
        assert_eq!(f.refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_uploading() {
        let gate = Arc::new(Notify::new());
        let f = fixture(FakeDriver {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        wait_for_status(&f.manager, &started.id, UploadStatus::Uploading).await;

        let record = f.manager.cancel(&started.id).unwrap();
        assert_eq!(record.status, UploadStatus::Cancelled);

        gate.notify_one();
        let record = started.handle.await.unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Cancelled);
        assert!(record.video_id.is_none());

        // 终态不可再取消
        assert!(matches!(
            f.manager.cancel(&started.id),
            Err(UploadError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_processing_cannot_be_cancelled() {
        let gate = Arc::new(Notify::new());
        let f = fixture(FakeDriver {
            gate: Some(gate.clone()),
            processing: true,
            ..Default::default()
        });

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        wait_for_status(&f.manager, &started.id, UploadStatus::Processing).await;

        let record = f.manager.get(&started.id).unwrap();
        assert_eq!(record.message.as_deref(), Some("Processing on YouTube"));
        assert!(matches!(
            f.manager.cancel(&started.id),
            Err(UploadError::InvalidTransition {
                action: "cancel",
                status: UploadStatus::Processing
            })
        ));

        gate.notify_one();
        let record = started.handle.await.unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Completed);
    }

    #[tokio::test]
    async fn test_overall_timeout() {
        let gate = Arc::new(Notify::new());
        let f = fixture_with(
            Some(youtube_account(Some("refresh"), Some(i64::MAX / 2))),
            FakeDriver {
                gate: Some(gate),
                ..Default::default()
            },
            Duration::from_millis(50),
        );

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let record = started.handle.await.unwrap().unwrap();

        assert_eq!(record.status, UploadStatus::Failed);
        assert!(record.error.unwrap().contains("timed out"));
        assert!(!record.needs_reauth);
    }

    #[tokio::test]
    async fn test_retry_and_resubmit_same_id() {
        let f = fixture(FakeDriver::with_results(vec![Err(UploadError::Transport(
            "YouTube API Error: backend error".to_string(),
        ))]));

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        let id = started.id.clone();
        let record = started.handle.await.unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Failed);
        assert_eq!(
            record.error.as_deref(),
            Some("YouTube API Error: backend error")
        );

        // 失败状态需要先 retry 才能重新提交
        assert!(matches!(
            f.manager.resubmit(&id),
            Err(UploadError::InvalidTransition { action: "resubmit", .. })
        ));

        let record = f.manager.retry(&id).unwrap();
        assert_eq!(record.status, UploadStatus::Pending);
        assert_eq!(record.attempt, 2);
        assert!(record.error.is_none());

        let resubmitted = f.manager.resubmit(&id).unwrap();
        assert_eq!(resubmitted.id, id);
        let record = resubmitted.handle.await.unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(f.manager.snapshot().len(), 1);

        assert_eq!(f.manager.clear_completed(), 1);
        assert!(f.manager.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_clear_and_remove_drop_requests() {
        let f = fixture(FakeDriver::with_results(vec![
            Err(UploadError::Transport("network down".to_string())),
            Err(UploadError::Transport("network down".to_string())),
        ]));

        let mut ids = Vec::new();
        for _ in 0..2 {
            let started = f
                .manager
                .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
                .unwrap();
            ids.push(started.id.clone());
            let record = started.handle.await.unwrap().unwrap();
            assert_eq!(record.status, UploadStatus::Failed);
        }
        assert_eq!(f.manager.requests.len(), 2);

        let removed = f.manager.remove(&ids[0]).unwrap();
        assert_eq!(removed.id, ids[0]);
        assert!(!f.manager.requests.contains_key(&ids[0]));
        assert!(matches!(
            f.manager.remove(&ids[0]),
            Err(UploadError::NotFound(_))
        ));

        assert_eq!(f.manager.clear(), 1);
        assert!(f.manager.requests.is_empty());
        assert!(f.manager.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_remove_refuses_active_upload() {
        let gate = Arc::new(Notify::new());
        let f = fixture(FakeDriver {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        let started = f
            .manager
            .start(Platform::YouTube, f.video.clone(), UploadMetadata::new("Title"))
            .unwrap();
        wait_for_status(&f.manager, &started.id, UploadStatus::Uploading).await;

        assert!(matches!(
            f.manager.remove(&started.id),
            Err(UploadError::InvalidTransition {
                action: "remove",
                status: UploadStatus::Uploading
            })
        ));
        assert_eq!(f.manager.clear(), 0);

        gate.notify_one();
        started.handle.await.unwrap();
    }
}
