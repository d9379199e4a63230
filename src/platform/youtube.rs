// YouTube Data API 客户端（可续传上传）

use super::error::PlatformError;
use super::{parse_token_response, read_response};
use crate::auth::{Platform, RefreshedTokens};
use crate::common::Clock;
use crate::config::YouTubeConfig;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const PLATFORM: Platform = Platform::YouTube;

/// 创建上传会话时提交的视频信息
#[derive(Debug, Clone, PartialEq)]
pub struct YouTubeVideoMeta {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    /// public / unlisted / private
    pub privacy_status: String,
}

/// 分片上传结果
#[derive(Debug, Clone, PartialEq)]
pub enum YouTubeChunkStatus {
    /// 308：已接收，继续上传；`received` 为服务端确认的已接收字节数
    Incomplete { received: Option<u64> },
    /// 200/201：上传完成
    Complete { video_id: String },
}

/// YouTube 可续传上传接口
#[async_trait]
pub trait YouTubeApi: Send + Sync {
    /// 创建可续传上传会话，返回会话 URL
    async fn create_session(
        &self,
        access_token: &str,
        meta: &YouTubeVideoMeta,
        total_bytes: u64,
        mime_type: &str,
    ) -> Result<String, PlatformError>;

    /// 上传 `[start, start + data.len())` 区间
    async fn put_chunk(
        &self,
        access_token: &str,
        session_url: &str,
        start: u64,
        data: Vec<u8>,
        total_bytes: u64,
        mime_type: &str,
    ) -> Result<YouTubeChunkStatus, PlatformError>;
}

pub struct YouTubeClient {
    http: Client,
    config: YouTubeConfig,
    clock: Arc<dyn Clock>,
}

impl YouTubeClient {
    pub fn new(http: Client, config: YouTubeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            config,
            clock,
        }
    }

    /// 刷新访问令牌（单次请求）
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, PlatformError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let (tokens, _) = self.token_request(&form).await?;
        Ok(tokens)
    }

    /// 授权码换取令牌
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<RefreshedTokens, PlatformError> {
        let form = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        let (tokens, _) = self.token_request(&form).await?;
        info!("YouTube 授权码换取令牌成功");
        Ok(tokens)
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(RefreshedTokens, Option<String>), PlatformError> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        let (status, body) = read_response(PLATFORM, response).await?;
        parse_token_response(PLATFORM, status, &body, self.clock.now_millis())
    }
}

#[async_trait]
impl YouTubeApi for YouTubeClient {
    async fn create_session(
        &self,
        access_token: &str,
        meta: &YouTubeVideoMeta,
        total_bytes: u64,
        mime_type: &str,
    ) -> Result<String, PlatformError> {
        let url = format!(
            "{}?uploadType=resumable&part=snippet,status",
            self.config.upload_endpoint
        );
        let body = json!({
            "snippet": {
                "title": meta.title,
                "description": meta.description,
                "tags": meta.tags,
                "categoryId": meta.category_id,
            },
            "status": {
                "privacyStatus": meta.privacy_status,
            },
        });

        debug!(
            "创建 YouTube 上传会话: size={}, type={}, privacy={}",
            total_bytes, mime_type, meta.privacy_status
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .header("X-Upload-Content-Length", total_bytes.to_string())
            .header("X-Upload-Content-Type", mime_type)
            .json(&body)
            .send()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        if !status.is_success() {
            return Err(PlatformError::from_response(PLATFORM, status.as_u16(), &body));
        }

        location
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                PlatformError::decode(PLATFORM, "upload session response has no Location header")
            })
    }

    async fn put_chunk(
        &self,
        access_token: &str,
        session_url: &str,
        start: u64,
        data: Vec<u8>,
        total_bytes: u64,
        mime_type: &str,
    ) -> Result<YouTubeChunkStatus, PlatformError> {
        let len = data.len() as u64;
        if len == 0 {
            return Err(PlatformError::decode(PLATFORM, "empty chunk"));
        }
        let end = start + len;
        let content_range = format!("bytes {}-{}/{}", start, end - 1, total_bytes);

        debug!("上传 YouTube 分片: {}", content_range);

        let response = self
            .http
            .put(session_url)
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, mime_type)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        let status = response.status();
        let received = response
            .headers()
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_end)
            .map(|last| last + 1);
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        match status {
            StatusCode::PERMANENT_REDIRECT => Ok(YouTubeChunkStatus::Incomplete { received }),
            StatusCode::OK | StatusCode::CREATED => {
                let json: Value =
                    serde_json::from_str(&body).map_err(|e| PlatformError::decode(PLATFORM, e))?;
                let video_id = json
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        PlatformError::decode(PLATFORM, "upload response has no video id")
                    })?;
                Ok(YouTubeChunkStatus::Complete {
                    video_id: video_id.to_string(),
                })
            }
            other => Err(PlatformError::from_response(PLATFORM, other.as_u16(), &body)),
        }
    }
}

/// 解析 `Range: bytes=0-12345` 中的结束位置
fn parse_range_end(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes=")?
        .split('-')
        .nth(1)?
        .trim()
        .parse()
        .ok()
}
