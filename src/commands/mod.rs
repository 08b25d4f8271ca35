//! 命令模块
//!
//! 提供渲染层调用的所有命令接口，按功能分组：
//! - session: 会话意图（输入、提交、付费流程、重置）
//! - share: 报告分享导出
//! - config: 配置管理命令
//!
//! 所有命令都是接收 `&AppState` 的异步函数，错误统一转成 `String`。

pub mod config;
pub mod session;
pub mod share;

// 重新导出所有命令
pub use config::*;
pub use session::*;
pub use share::*;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::app::build_state;
    use crate::llm::testing::StaticProvider;
    use crate::llm::AnalysisClient;
    use crate::logger::LogBroadcaster;
    use crate::models::AppSettings;
    use crate::settings::SettingsManager;
    use crate::share::ShareService;
    use crate::AppState;

    pub async fn state_with(provider: StaticProvider, settings: AppSettings) -> AppState {
        build_state(
            Arc::new(SettingsManager::from_settings(settings)),
            Arc::new(AnalysisClient::new(Arc::new(provider))),
            Arc::new(LogBroadcaster::new()),
            ShareService::new(),
        )
        .await
    }
}
