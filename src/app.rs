//! 应用程序初始化和启动
//!
//! 负责核心的完整启动流程：
//! - 配置加载（配置文件 + 环境变量）
//! - 日志系统初始化
//! - HTTP 客户端与分析客户端创建
//! - Session Actor 启动

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::actors::SessionActor;
use crate::event_bus::EventBus;
use crate::llm::{AnalysisClient, LLMConfig};
use crate::logger::{self, LogBroadcaster};
use crate::settings::SettingsManager;
use crate::share::ShareService;
use crate::AppState;

/// 事件总线容量（打字机会产生大量帧）
pub const EVENT_BUS_CAPACITY: usize = 1000;

/// 启动核心
///
/// 1. 加载配置
/// 2. 初始化日志
/// 3. 创建分析客户端
/// 4. 启动 Session Actor 并开始开场动画
pub async fn bootstrap(settings_path: Option<PathBuf>) -> anyhow::Result<AppState> {
    let settings = SettingsManager::new(settings_path).await?;
    let config = settings.get().await;

    let log_broadcaster = Arc::new(LogBroadcaster::new());
    logger::init(&config.logging, log_broadcaster.clone()).context("初始化日志系统失败")?;
    // 配置在日志系统之前加载，加载结果在此补报
    settings.log_source();

    info!("初始化 NEMESIS...");

    let client = build_analysis_client(&config.llm)?;
    let state = build_state(
        Arc::new(settings),
        Arc::new(client),
        log_broadcaster,
        ShareService::new(),
    )
    .await;

    state
        .session
        .start_onboarding()
        .await
        .context("启动开场动画失败")?;

    info!("NEMESIS 已启动");
    Ok(state)
}

/// 按 LLM 配置创建共享的 HTTP 客户端
pub fn build_http_client(config: &LLMConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
        .context("创建 HTTP 客户端失败")
}

pub fn build_analysis_client(config: &LLMConfig) -> anyhow::Result<AnalysisClient> {
    let http = build_http_client(config)?;
    let client = AnalysisClient::from_config(config, http)?;
    info!(
        "分析客户端: provider={}, model={}, 已配置: {}",
        client.provider_name(),
        config.model,
        client.is_configured()
    );
    Ok(client)
}

/// 组装应用状态并启动 Session Actor（需要在 Tokio 运行时中调用）
pub async fn build_state(
    settings: Arc<SettingsManager>,
    client: Arc<AnalysisClient>,
    log_broadcaster: Arc<LogBroadcaster>,
    share: ShareService,
) -> AppState {
    let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
    log_broadcaster.set_event_bus(event_bus.clone());

    // 之后的节奏变更通过 reconfigure 下发
    let timing = settings.get().await.timing;

    let (actor, session) = SessionActor::new(client, event_bus.clone(), timing);
    tokio::spawn(actor.run());
    info!("Session Actor 已启动");

    AppState {
        settings,
        session,
        event_bus,
        log_broadcaster,
        share,
    }
}
