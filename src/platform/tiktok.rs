// TikTok Content Posting API 客户端

use super::error::PlatformError;
use super::{parse_token_response, read_response};
use crate::auth::{Platform, RefreshedTokens};
use crate::common::Clock;
use crate::config::TikTokConfig;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const PLATFORM: Platform = Platform::TikTok;

/// 标题最大长度（字符）
pub const MAX_TITLE_CHARS: usize = 2200;

/// 发布信息
#[derive(Debug, Clone, PartialEq)]
pub struct TikTokPostInfo {
    pub title: String,
    /// PUBLIC_TO_EVERYONE / MUTUAL_FOLLOW_FRIEND / SELF_ONLY / FOLLOWER_OF_CREATOR
    pub privacy_level: String,
    pub disable_duet: bool,
    pub disable_comment: bool,
    pub disable_stitch: bool,
}

/// 初始化上传返回的会话
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TikTokInit {
    pub publish_id: String,
    pub upload_url: String,
}

/// 发布状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TikTokStatus {
    /// PROCESSING_UPLOAD / PROCESSING_DOWNLOAD / SEND_TO_USER_INBOX / PUBLISH_COMPLETE / FAILED ...
    pub status: String,
    pub fail_reason: Option<String>,
    /// 公开作品 ID（审核通过后才有）
    pub post_id: Option<String>,
}

impl TikTokStatus {
    pub fn is_complete(&self) -> bool {
        self.status == "PUBLISH_COMPLETE"
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status.as_str(), "PUBLISH_FAILED" | "FAILED")
    }
}

/// TikTok 分片上传接口
#[async_trait]
pub trait TikTokApi: Send + Sync {
    /// 初始化发布，声明文件大小和分片方案
    async fn init_upload(
        &self,
        access_token: &str,
        post: &TikTokPostInfo,
        video_size: u64,
        chunk_size: u64,
        total_chunk_count: u64,
    ) -> Result<TikTokInit, PlatformError>;

    /// 上传 `[start, start + data.len())` 区间
    async fn put_chunk(
        &self,
        upload_url: &str,
        start: u64,
        data: Vec<u8>,
        total_bytes: u64,
        mime_type: &str,
    ) -> Result<(), PlatformError>;

    /// 查询发布状态
    async fn fetch_status(
        &self,
        access_token: &str,
        publish_id: &str,
    ) -> Result<TikTokStatus, PlatformError>;
}

/// TikTok 开放接口的统一响应结构 `{ "data": ..., "error": { "code": "ok", ... } }`
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeError {
    #[serde(default)]
    code: String,
}

pub struct TikTokClient {
    http: Client,
    config: TikTokConfig,
    clock: Arc<dyn Clock>,
}

impl TikTokClient {
    pub fn new(http: Client, config: TikTokConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            config,
            clock,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// 刷新访问令牌（单次请求）
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, PlatformError> {
        let form = [
            ("client_key", self.config.client_key.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let (tokens, _) = self.token_request(&form).await?;
        Ok(tokens)
    }

    /// 授权码换取令牌，同时返回用户 open_id
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<(RefreshedTokens, Option<String>), PlatformError> {
        let form = [
            ("client_key", self.config.client_key.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];
        let result = self.token_request(&form).await?;
        info!("TikTok 授权码换取令牌成功");
        Ok(result)
    }

    async fn token_request(
        &self,
        form: &[(&str, &str)],
    ) -> Result<(RefreshedTokens, Option<String>), PlatformError> {
        let response = self
            .http
            .post(self.url("oauth/token/"))
            .form(form)
            .send()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        let (status, body) = read_response(PLATFORM, response).await?;
        parse_token_response(PLATFORM, status, &body, self.clock.now_millis())
    }

    /// 发送 JSON 请求并解开统一响应结构
    async fn post_json(
        &self,
        path: &str,
        access_token: &str,
        body: Value,
    ) -> Result<Value, PlatformError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(access_token)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        let (status, text) = read_response(PLATFORM, response).await?;
        if !status.is_success() {
            return Err(PlatformError::from_response(PLATFORM, status.as_u16(), &text));
        }

        let envelope: Envelope =
            serde_json::from_str(&text).map_err(|e| PlatformError::decode(PLATFORM, e))?;

        match envelope.error {
            Some(error) if error.code != "ok" => Err(PlatformError::from_response(
                PLATFORM,
                status.as_u16(),
                &text,
            )),
            _ => Ok(envelope.data),
        }
    }
}

/// 按字符截断标题
pub fn truncate_title(title: &str) -> String {
    title.chars().take(MAX_TITLE_CHARS).collect()
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl TikTokApi for TikTokClient {
    async fn init_upload(
        &self,
        access_token: &str,
        post: &TikTokPostInfo,
        video_size: u64,
        chunk_size: u64,
        total_chunk_count: u64,
    ) -> Result<TikTokInit, PlatformError> {
        let body = json!({
            "post_info": {
                "title": truncate_title(&post.title),
                "privacy_level": post.privacy_level,
                "disable_duet": post.disable_duet,
                "disable_comment": post.disable_comment,
                "disable_stitch": post.disable_stitch,
            },
            "source_info": {
                "source": "FILE_UPLOAD",
                "video_size": video_size,
                "chunk_size": chunk_size,
                "total_chunk_count": total_chunk_count,
            },
        });

        debug!(
            "初始化 TikTok 上传: size={}, chunk_size={}, chunks={}",
            video_size, chunk_size, total_chunk_count
        );

        let data = self
            .post_json("post/publish/video/init/", access_token, body)
            .await?;

        let publish_id = string_field(&data, "publish_id")
            .ok_or_else(|| PlatformError::decode(PLATFORM, "init response has no publish_id"))?;
        let upload_url = string_field(&data, "upload_url")
            .ok_or_else(|| PlatformError::decode(PLATFORM, "init response has no upload_url"))?;

        Ok(TikTokInit {
            publish_id,
            upload_url,
        })
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        start: u64,
        data: Vec<u8>,
        total_bytes: u64,
        mime_type: &str,
    ) -> Result<(), PlatformError> {
        let len = data.len() as u64;
        if len == 0 {
            return Err(PlatformError::decode(PLATFORM, "empty chunk"));
        }
        let content_range = format!("bytes {}-{}/{}", start, start + len - 1, total_bytes);

        debug!("上传 TikTok 分片: {}", content_range);

        let response = self
            .http
            .put(upload_url)
            .header(CONTENT_TYPE, mime_type)
            .header(CONTENT_LENGTH, len)
            .header(CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(|e| PlatformError::transport(PLATFORM, e))?;

        let (status, body) = read_response(PLATFORM, response).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(PlatformError::from_response(PLATFORM, status.as_u16(), &body))
        }
    }

    async fn fetch_status(
        &self,
        access_token: &str,
        publish_id: &str,
    ) -> Result<TikTokStatus, PlatformError> {
        let data = self
            .post_json(
                "post/publish/status/fetch/",
                access_token,
                json!({ "publish_id": publish_id }),
            )
            .await?;

        let status = string_field(&data, "status")
            .ok_or_else(|| PlatformError::decode(PLATFORM, "status response has no status"))?;

        // 审核通过后的作品 ID 在 publicaly_available_post_id（接口原文拼写）数组中
        let post_id = data
            .get("publicaly_available_post_id")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .or_else(|| string_field(&data, "video_id"));

        Ok(TikTokStatus {
            status,
            fail_reason: string_field(&data, "fail_reason"),
            post_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use crate::platform::{build_http_client, PlatformErrorKind};
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> TikTokClient {
        let config = TikTokConfig {
            client_key: "ck".to_string(),
            client_secret: "cs".to_string(),
            api_base: format!("{}/v2", server.url()),
        };
        TikTokClient::new(
            build_http_client().unwrap(),
            config,
            Arc::new(ManualClock::new(0)),
        )
    }

    fn post() -> TikTokPostInfo {
        TikTokPostInfo {
            title: "x".repeat(3000),
            privacy_level: "SELF_ONLY".to_string(),
            disable_duet: true,
            disable_comment: false,
            disable_stitch: false,
        }
    }

    #[test]
    fn test_truncate_title_counts_chars() {
        let title = "视".repeat(2500);
        let truncated = truncate_title(&title);
        assert_eq!(truncated.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(truncate_title("short"), "short");
    }

    #[tokio::test]
    async fn test_init_upload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/post/publish/video/init/")
            .match_header("authorization", "Bearer act")
            .match_body(Matcher::PartialJson(json!({
                "post_info": {"title": "x".repeat(2200), "privacy_level": "SELF_ONLY", "disable_duet": true},
                "source_info": {
                    "source": "FILE_UPLOAD",
                    "video_size": 157286400u64,
                    "chunk_size": 52428800u64,
                    "total_chunk_count": 3
                }
            })))
            .with_status(200)
            .with_body(r#"{"data":{"publish_id":"v_pub_1","upload_url":"https://upload.example/v1"},"error":{"code":"ok","message":"","log_id":"l"}}"#)
            .create_async()
            .await;

        let init = client(&server)
            .init_upload("act", &post(), 157_286_400, 52_428_800, 3)
            .await
            .unwrap();

        assert_eq!(init.publish_id, "v_pub_1");
        assert_eq!(init.upload_url, "https://upload.example/v1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_init_upload_policy_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/post/publish/video/init/")
            .with_status(403)
            .with_body(r#"{"error":{"code":"unaudited_client_can_only_post_to_private","message":"..."}}"#)
            .create_async()
            .await;

        let err = client(&server)
            .init_upload("act", &post(), 10, 10, 1)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), PlatformErrorKind::Policy);
        assert_eq!(
            err.to_string(),
            "Videos can only be posted as private until the app is audited by TikTok."
        );
    }

    #[tokio::test]
    async fn test_put_chunk_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/upload")
            .match_header("content-range", "bytes 10-19/25")
            .match_header("content-type", "video/mp4")
            .match_header("content-length", "10")
            .with_status(206)
            .create_async()
            .await;

        client(&server)
            .put_chunk(
                &format!("{}/upload", server.url()),
                10,
                vec![0; 10],
                25,
                "video/mp4",
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_chunk_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/upload")
            .with_status(416)
            .with_body("range not satisfiable")
            .create_async()
            .await;

        let err = client(&server)
            .put_chunk(&format!("{}/upload", server.url()), 0, vec![0; 4], 4, "video/mp4")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "TikTok API Error: range not satisfiable");
    }

    #[tokio::test]
    async fn test_fetch_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/post/publish/status/fetch/")
            .match_body(Matcher::Json(json!({"publish_id": "v_pub_1"})))
            .with_status(200)
            .with_body(r#"{"data":{"status":"PUBLISH_COMPLETE","publicaly_available_post_id":[7234567890123],"uploaded_bytes":100},"error":{"code":"ok"}}"#)
            .create_async()
            .await;

        let status = client(&server)
            .fetch_status("act", "v_pub_1")
            .await
            .unwrap();

        assert!(status.is_complete());
        assert_eq!(status.post_id.as_deref(), Some("7234567890123"));
    }

    #[tokio::test]
    async fn test_fetch_status_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/post/publish/status/fetch/")
            .with_status(200)
            .with_body(r#"{"data":{"status":"FAILED","fail_reason":"file_format_check_failed"},"error":{"code":"ok"}}"#)
            .create_async()
            .await;

        let status = client(&server).fetch_status("act", "p").await.unwrap();
        assert!(status.is_failed());
        assert_eq!(status.fail_reason.as_deref(), Some("file_format_check_failed"));
    }

    #[tokio::test]
    async fn test_refresh() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/oauth/token/")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_key".into(), "ck".into()),
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rft".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"act.2","refresh_token":"rft.2","expires_in":86400,"open_id":"o"}"#)
            .create_async()
            .await;

        let tokens = client(&server).refresh("rft").await.unwrap();
        assert_eq!(tokens.access_token, "act.2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rft.2"));
        assert_eq!(tokens.expires_at, Some(86_400_000));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code_returns_open_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/oauth/token/")
            .match_body(Matcher::UrlEncoded("code".into(), "c-1".into()))
            .with_status(200)
            .with_body(r#"{"access_token":"a","refresh_token":"r","expires_in":10,"open_id":"open-9"}"#)
            .create_async()
            .await;

        let (_, open_id) = client(&server)
            .exchange_code("c-1", "http://localhost/cb")
            .await
            .unwrap();
        assert_eq!(open_id.as_deref(), Some("open-9"));
    }
}
