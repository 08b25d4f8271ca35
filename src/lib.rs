// NEMESIS 核心库 - 内容"翻车"评判会话

// 声明模块
pub mod actors;
pub mod app;
pub mod capture;
pub mod commands;
pub mod event_bus;
pub mod llm;
pub mod logger;
pub mod models;
pub mod session;
pub mod settings;
pub mod share;
pub mod typewriter;

use std::sync::Arc;

use actors::SessionHandle;
use event_bus::EventBus;
use logger::LogBroadcaster;
use settings::SettingsManager;
use share::ShareService;

pub use app::bootstrap;

/// 应用状态
///
/// 渲染层通过 `commands` 中的函数操作它，通过 `event_bus` 订阅变化。
/// 会话的可变状态只存在于 Session Actor 中，这里只持有句柄。
#[derive(Clone)]
pub struct AppState {
    /// 配置管理
    pub settings: Arc<SettingsManager>,
    /// 会话句柄
    pub session: SessionHandle,
    /// 事件总线
    pub event_bus: Arc<EventBus>,
    /// 日志推送器
    pub log_broadcaster: Arc<LogBroadcaster>,
    /// 分享服务
    pub share: ShareService,
}
