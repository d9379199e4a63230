use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use omnipost::auth::{MonitorPolicy, TokenPolicy};
use omnipost::common::{SystemClock, TokioSleeper};
use omnipost::config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH};
use omnipost::{
    logging, Account, AccountProfile, JsonFileAccountStore, Platform, PlatformClients,
    PrivacyLevel, Session, TokenManager, TokenMonitor, UploadEvent, UploadManager,
    UploadMetadata, UploadStatus, VideoFile,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// omnipost: upload videos to YouTube and TikTok with resumable chunked uploads.
#[derive(Parser)]
#[command(name = "omnipost", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a video
    Upload {
        /// Target platform (youtube / tiktok)
        #[arg(short, long)]
        platform: Platform,

        /// Video file path
        #[arg(short, long)]
        file: PathBuf,

        /// Video title
        #[arg(short, long)]
        title: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Comma separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// public / unlisted / private / followers
        #[arg(long, default_value = "public")]
        privacy: String,

        /// YouTube category id
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        disable_comment: bool,

        #[arg(long)]
        disable_duet: bool,

        #[arg(long)]
        disable_stitch: bool,
    },

    /// List connected accounts
    Accounts,

    /// Connect an account with an OAuth authorization code
    Connect {
        #[arg(short, long)]
        platform: Platform,

        /// Authorization code returned by the provider
        #[arg(long)]
        code: String,

        #[arg(long)]
        redirect_uri: String,

        /// YouTube channel id (TikTok uses the open_id returned by the provider)
        #[arg(long)]
        account_id: Option<String>,

        /// Channel title or TikTok username
        #[arg(long)]
        name: String,
    },

    /// Disconnect an account
    Disconnect {
        #[arg(short, long)]
        platform: Platform,
    },

    /// Force a token refresh
    Refresh {
        #[arg(short, long)]
        platform: Platform,
    },
}

/// 运行时依赖
struct App {
    config: AppConfig,
    clients: Arc<PlatformClients>,
    session: Arc<Session>,
    tokens: Arc<TokenManager>,
}

impl App {
    fn build(config: AppConfig) -> Result<Self> {
        let clock = Arc::new(SystemClock);
        let clients = Arc::new(
            PlatformClients::from_config(&config, clock.clone())
                .context("创建平台客户端失败")?,
        );

        let store = Arc::new(JsonFileAccountStore::new(&config.accounts.store_path));
        let session = Arc::new(Session::restore(store));

        let tokens = Arc::new(TokenManager::new(
            session.clone(),
            clients.clone(),
            clock,
            Arc::new(TokioSleeper),
            TokenPolicy::from(&config.token),
        ));

        Ok(Self {
            config,
            clients,
            session,
            tokens,
        })
    }
}

/// 加载日志配置（配置文件不可用时使用默认值）
async fn load_log_config(path: &str) -> LogConfig {
    let Ok(content) = tokio::fs::read_to_string(path).await else {
        return LogConfig::default();
    };
    toml::from_str::<toml::Value>(&content)
        .ok()
        .and_then(|value| value.get("log").cloned())
        .and_then(|log| log.try_into::<LogConfig>().ok())
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("omnipost v{} 启动", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(&cli.config).await;
    let app = App::build(config)?;

    match cli.command {
        Commands::Upload {
            platform,
            file,
            title,
            description,
            tags,
            privacy,
            category,
            disable_comment,
            disable_duet,
            disable_stitch,
        } => {
            let metadata = UploadMetadata {
                title,
                description,
                tags,
                privacy: PrivacyLevel::parse_lossy(&privacy),
                category,
                disable_comment,
                disable_duet,
                disable_stitch,
            };
            run_upload(&app, platform, file, metadata).await
        }
        Commands::Accounts => {
            list_accounts(&app);
            Ok(())
        }
        Commands::Connect {
            platform,
            code,
            redirect_uri,
            account_id,
            name,
        } => connect(&app, platform, &code, &redirect_uri, account_id, name).await,
        Commands::Disconnect { platform } => {
            match app.session.disconnect(platform)? {
                Some(account) => println!(
                    "Disconnected {} ({})",
                    platform.display_name(),
                    account.profile.label()
                ),
                None => println!("{} account not connected", platform.display_name()),
            }
            Ok(())
        }
        Commands::Refresh { platform } => {
            app.tokens.force_refresh(platform).await?;
            println!("{} token refreshed", platform.display_name());
            Ok(())
        }
    }
}

async fn run_upload(
    app: &App,
    platform: Platform,
    file: PathBuf,
    metadata: UploadMetadata,
) -> Result<()> {
    let video = VideoFile::from_path(&file).map_err(anyhow::Error::msg)?;

    let shutdown = CancellationToken::new();
    let monitor = Arc::new(TokenMonitor::new(
        app.tokens.clone(),
        MonitorPolicy::from(&app.config.token),
    ));
    let monitor_handle = monitor.spawn(shutdown.clone());

    let manager = Arc::new(UploadManager::with_clients(
        &app.clients,
        app.tokens.clone(),
        Arc::new(TokioSleeper),
        &app.config.upload,
    ));

    let mut events = manager.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                UploadEvent::Progress {
                    progress, message, ..
                } => println!("{:>5.1}% {}", progress, message.unwrap_or_default()),
                UploadEvent::StatusChanged { new_status, .. } => println!("status: {}", new_status),
                _ => {}
            }
        }
    });

    let started = manager.start(platform, video, metadata)?;
    let upload_id = started.id.clone();
    let mut handle = started.handle;

    let record = tokio::select! {
        joined = &mut handle => joined.context("上传任务异常退出")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("收到中断信号，取消上传: {}", upload_id);
            if let Err(e) = manager.cancel(&upload_id) {
                warn!("取消失败: {}", e);
            }
            handle.await.context("上传任务异常退出")?
        }
    };

    shutdown.cancel();
    let _ = monitor_handle.await;
    printer.abort();

    let Some(record) = record else {
        anyhow::bail!("upload record {} disappeared", upload_id);
    };

    match record.status {
        UploadStatus::Completed => {
            println!(
                "Upload complete: {}",
                record
                    .video_url
                    .or(record.video_id)
                    .unwrap_or_default()
            );
            Ok(())
        }
        UploadStatus::Cancelled => {
            println!("Upload cancelled");
            Ok(())
        }
        status => {
            let message = record.error.unwrap_or_else(|| status.to_string());
            error!("上传失败: {}", message);
            if record.needs_reauth {
                println!(
                    "{} authorization expired, run `omnipost connect --platform {}` again",
                    platform.display_name(),
                    platform
                );
            }
            anyhow::bail!(message)
        }
    }
}

fn list_accounts(app: &App) {
    let now = chrono::Utc::now().timestamp_millis();
    for platform in Platform::ALL {
        match app.session.account(platform) {
            Some(account) => {
                let expiry = match account.expires_at {
                    Some(at) if at <= now => "expired".to_string(),
                    Some(at) => format!("expires in {} min", (at - now) / 60_000),
                    None => "no expiry".to_string(),
                };
                println!(
                    "{:<8} {} ({}, {}{})",
                    platform.display_name(),
                    account.profile.label(),
                    account.id,
                    expiry,
                    if account.can_refresh() { "" } else { ", no refresh token" }
                );
            }
            None => println!("{:<8} not connected", platform.display_name()),
        }
    }
}

async fn connect(
    app: &App,
    platform: Platform,
    code: &str,
    redirect_uri: &str,
    account_id: Option<String>,
    name: String,
) -> Result<()> {
    let account = match platform {
        Platform::YouTube => {
            let tokens = app.clients.youtube.exchange_code(code, redirect_uri).await?;
            let channel_id = account_id.context("--account-id is required for YouTube")?;
            Account {
                id: channel_id.clone(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at: tokens.expires_at,
                profile: AccountProfile::YouTube {
                    channel_id,
                    title: name,
                    description: None,
                    thumbnail: None,
                    subscriber_count: None,
                },
            }
        }
        Platform::TikTok => {
            let (tokens, open_id) = app.clients.tiktok.exchange_code(code, redirect_uri).await?;
            let open_id = open_id
                .or(account_id)
                .context("TikTok did not return an open_id, pass --account-id")?;
            Account {
                id: open_id.clone(),
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at: tokens.expires_at,
                profile: AccountProfile::TikTok {
                    open_id,
                    username: name.trim_start_matches('@').to_string(),
                    display_name: None,
                    avatar: None,
                    follower_count: None,
                },
            }
        }
    };

    let label = account.profile.label().to_string();
    app.session.connect(account)?;
    println!("Connected {} ({})", platform.display_name(), label);
    Ok(())
}
