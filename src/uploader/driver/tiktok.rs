// TikTok 直接发布驱动
//
// 初始化发布 -> 顺序 PUT 分片 -> 每隔固定间隔查询发布状态，直到完成、失败或次数耗尽。
// 最后一片上传后平台自动发布，不需要额外的发布调用

use super::{
    read_chunk, tiktok_video_url, DriverObserver, UploadDriver, UploadJob, UploadOutcome,
};
use crate::auth::Platform;
use crate::common::Sleeper;
use crate::config::UploadConfig;
use crate::platform::tiktok::{TikTokApi, TikTokPostInfo};
use crate::uploader::error::UploadError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct TikTokDriver {
    api: Arc<dyn TikTokApi>,
    sleeper: Arc<dyn Sleeper>,
    poll_interval: Duration,
    max_polls: u32,
}

impl TikTokDriver {
    pub fn new(
        api: Arc<dyn TikTokApi>,
        sleeper: Arc<dyn Sleeper>,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Self {
        Self {
            api,
            sleeper,
            poll_interval,
            max_polls,
        }
    }

    pub fn from_config(
        api: Arc<dyn TikTokApi>,
        sleeper: Arc<dyn Sleeper>,
        config: &UploadConfig,
    ) -> Self {
        Self::new(
            api,
            sleeper,
            config.status_poll_interval(),
            config.max_status_polls,
        )
    }

    /// 轮询发布状态
    async fn wait_for_publish(
        &self,
        job: &UploadJob,
        publish_id: &str,
    ) -> Result<UploadOutcome, UploadError> {
        for attempt in 1..=self.max_polls {
            self.sleeper.sleep(self.poll_interval).await;

            let status = self.api.fetch_status(&job.access_token, publish_id).await?;
            debug!(
                "TikTok 发布状态 #{}/{}: publish_id={}, status={}",
                attempt, self.max_polls, publish_id, status.status
            );

            if status.is_complete() {
                let video_url = match (&job.username, &status.post_id) {
                    (Some(username), Some(post_id)) => Some(tiktok_video_url(username, post_id)),
                    _ => None,
                };
                let video_id = status.post_id.unwrap_or_else(|| publish_id.to_string());
                info!(
                    "TikTok 发布完成: upload={}, video_id={}",
                    job.upload_id, video_id
                );
                return Ok(UploadOutcome { video_id, video_url });
            }

            if status.is_failed() {
                let reason = status
                    .fail_reason
                    .unwrap_or_else(|| "unknown reason".to_string());
                error!(
                    "TikTok 发布失败: upload={}, publish_id={}, reason={}",
                    job.upload_id, publish_id, reason
                );
                return Err(UploadError::Policy(format!(
                    "TikTok publish failed: {}",
                    reason
                )));
            }
        }

        Err(UploadError::Timeout(format!(
            "TikTok publish status check timed out after {} attempts",
            self.max_polls
        )))
    }
}

#[async_trait]
impl UploadDriver for TikTokDriver {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn upload(
        &self,
        job: &UploadJob,
        observer: &dyn DriverObserver,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let plan = &job.plan;
        let metadata = &job.metadata;

        info!(
            "TikTok 上传开始: upload={}, file={}, size={}, chunk_size={}, chunks={}",
            job.upload_id, job.video.name, plan.total_bytes, plan.chunk_size, plan.total_chunks
        );

        let post = TikTokPostInfo {
            title: metadata.title.clone(),
            privacy_level: metadata.privacy.tiktok_privacy_level().to_string(),
            disable_duet: metadata.disable_duet,
            disable_comment: metadata.disable_comment,
            disable_stitch: metadata.disable_stitch,
        };

        let init = self
            .api
            .init_upload(
                &job.access_token,
                &post,
                plan.total_bytes,
                plan.chunk_size,
                plan.total_chunks,
            )
            .await?;
        debug!("TikTok 发布已初始化: publish_id={}", init.publish_id);

        for chunk in plan.chunks() {
            let data = read_chunk(job, &chunk, cancel).await?;
            self.api
                .put_chunk(
                    &init.upload_url,
                    chunk.range.start,
                    data,
                    plan.total_bytes,
                    &job.video.mime_type,
                )
                .await?;

            debug!(
                "TikTok 分片 #{} 已上传: bytes={}-{}",
                chunk.index,
                chunk.range.start,
                chunk.range.end - 1
            );
            observer.on_chunk_uploaded(chunk.range.end, plan.total_bytes);
        }

        observer.on_processing();
        self.wait_for_publish(job, &init.publish_id).await
    }
}
