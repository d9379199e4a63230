// YouTube 可续传上传驱动
//
// 创建会话 -> 顺序 PUT 分片 -> 最后一片返回 200/201 即完成，无需轮询

use super::{
    read_chunk, youtube_video_url, DriverObserver, UploadDriver, UploadJob, UploadOutcome,
};
use crate::auth::Platform;
use crate::platform::youtube::{YouTubeApi, YouTubeChunkStatus, YouTubeVideoMeta};
use crate::uploader::error::UploadError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct YouTubeDriver {
    api: Arc<dyn YouTubeApi>,
    /// 未指定分类时使用
    default_category: String,
}

impl YouTubeDriver {
    pub fn new(api: Arc<dyn YouTubeApi>, default_category: impl Into<String>) -> Self {
        Self {
            api,
            default_category: default_category.into(),
        }
    }

    fn video_meta(&self, job: &UploadJob) -> YouTubeVideoMeta {
        let metadata = &job.metadata;
        YouTubeVideoMeta {
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            tags: metadata.tags.clone(),
            category_id: metadata
                .category
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| self.default_category.clone()),
            privacy_status: metadata.privacy.youtube_privacy_status().to_string(),
        }
    }
}

#[async_trait]
impl UploadDriver for YouTubeDriver {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn upload(
        &self,
        job: &UploadJob,
        observer: &dyn DriverObserver,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let plan = &job.plan;
        let mime_type = job.video.mime_type.as_str();

        info!(
            "YouTube 上传开始: upload={}, file={}, size={}, chunks={}",
            job.upload_id, job.video.name, plan.total_bytes, plan.total_chunks
        );

        let session_url = self
            .api
            .create_session(
                &job.access_token,
                &self.video_meta(job),
                plan.total_bytes,
                mime_type,
            )
            .await?;

        for chunk in plan.chunks() {
            let data = read_chunk(job, &chunk, cancel).await?;
            let is_last = chunk.index as u64 + 1 == plan.total_chunks;

            let status = self
                .api
                .put_chunk(
                    &job.access_token,
                    &session_url,
                    chunk.range.start,
                    data,
                    plan.total_bytes,
                    mime_type,
                )
                .await?;

            match status {
                YouTubeChunkStatus::Complete { video_id } => {
                    if !is_last {
                        warn!(
                            "YouTube 在第 {}/{} 片提前确认完成",
                            chunk.index + 1,
                            plan.total_chunks
                        );
                    }
                    observer.on_chunk_uploaded(plan.total_bytes, plan.total_bytes);
                    info!("YouTube 上传完成: upload={}, video_id={}", job.upload_id, video_id);
                    return Ok(UploadOutcome {
                        video_url: Some(youtube_video_url(&video_id)),
                        video_id,
                    });
                }
                YouTubeChunkStatus::Incomplete { received } => {
                    if is_last {
                        return Err(UploadError::Transport(format!(
                            "YouTube did not confirm the upload after the final chunk \
                             (received {} of {} bytes)",
                            received.unwrap_or(0),
                            plan.total_bytes
                        )));
                    }
                    // 服务端确认的字节数必须与本片末尾一致，否则下一片偏移错误
                    if let Some(received) = received {
                        if received != chunk.range.end {
                            return Err(UploadError::Transport(format!(
                                "YouTube acknowledged {} bytes but {} were sent",
                                received, chunk.range.end
                            )));
                        }
                    }
                    debug!(
                        "YouTube 分片 #{} 已接收: bytes={}-{}, 服务端确认={:?}",
                        chunk.index,
                        chunk.range.start,
                        chunk.range.end - 1,
                        received
                    );
                    observer.on_chunk_uploaded(chunk.range.end, plan.total_bytes);
                }
            }
        }

        Err(UploadError::Transport(
            "YouTube upload finished without a video id".to_string(),
        ))
    }
}
