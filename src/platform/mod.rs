// 平台接口模块
//
// YouTube / TikTok 的 HTTP 客户端：创建上传会话、上传分片、查询发布状态、
// 刷新令牌和授权码换取令牌

pub mod error;
pub mod tiktok;
pub mod youtube;

pub use error::{tiktok_error_message, user_message, PlatformError, PlatformErrorKind};
pub use tiktok::{TikTokApi, TikTokClient, TikTokInit, TikTokPostInfo, TikTokStatus};
pub use youtube::{YouTubeApi, YouTubeChunkStatus, YouTubeClient, YouTubeVideoMeta};

use crate::auth::{Platform, RefreshedTokens, TokenRefresher};
use crate::common::Clock;
use crate::config::AppConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// 构建平台请求使用的 HTTP 客户端
///
/// 不跟随重定向：YouTube 用 308 表示"分片已接收，继续上传"
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(300))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("Failed to create HTTP client")
}

/// 读取响应状态码和响应体
pub(crate) async fn read_response(
    platform: Platform,
    response: reqwest::Response,
) -> Result<(reqwest::StatusCode, String), PlatformError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| PlatformError::transport(platform, e))?;
    Ok((status, body))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    open_id: Option<String>,
}

/// 解析令牌接口响应
///
/// 返回新令牌和（TikTok 才有的）open_id
pub(crate) fn parse_token_response(
    platform: Platform,
    status: reqwest::StatusCode,
    body: &str,
    now_ms: i64,
) -> Result<(RefreshedTokens, Option<String>), PlatformError> {
    if !status.is_success() {
        return Err(PlatformError::from_response(platform, status.as_u16(), body));
    }

    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|e| PlatformError::decode(platform, e))?;

    // TikTok 的令牌接口出错时也可能返回 200
    let Some(access_token) = parsed.access_token.filter(|t| !t.is_empty()) else {
        return Err(PlatformError::from_response(platform, status.as_u16(), body));
    };

    let tokens = RefreshedTokens::from_expires_in(
        access_token,
        parsed.refresh_token,
        parsed.expires_in,
        now_ms,
    );
    Ok((tokens, parsed.open_id))
}

/// 两个平台客户端的组合，按平台分发令牌刷新
pub struct PlatformClients {
    pub youtube: Arc<YouTubeClient>,
    pub tiktok: Arc<TikTokClient>,
}

impl PlatformClients {
    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let http = build_http_client()?;
        Ok(Self {
            youtube: Arc::new(YouTubeClient::new(
                http.clone(),
                config.youtube.clone(),
                clock.clone(),
            )),
            tiktok: Arc::new(TikTokClient::new(http, config.tiktok.clone(), clock)),
        })
    }
}

#[async_trait]
impl TokenRefresher for PlatformClients {
    async fn refresh_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<RefreshedTokens, PlatformError> {
        match platform {
            Platform::YouTube => self.youtube.refresh(refresh_token).await,
            Platform::TikTok => self.tiktok.refresh(refresh_token).await,
        }
    }
}
