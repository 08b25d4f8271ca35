//! 配置管理命令
//!
//! 提供应用配置的读取和更新接口，包括：
//! - 节奏配置（立即下发给 Session Actor）
//! - LLM 配置（重建分析客户端）
//! - 分享配置与日志推送开关

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::app::build_analysis_client;
use crate::event_bus::AppEvent;
use crate::models::{AppSettings, SettingsPatch};
use crate::AppState;

/// 分析服务状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatus {
    pub provider: String,
    pub model: String,
    pub configured: bool,
}

/// 获取应用配置（不包含 API key）
pub async fn get_app_settings(state: &AppState) -> Result<AppSettings, String> {
    Ok(state.settings.get().await)
}

/// 更新配置（只在内存中生效）
pub async fn update_settings(
    state: &AppState,
    patch: SettingsPatch,
) -> Result<AppSettings, String> {
    // 先校验，失败时不改动任何配置
    let client = match patch.llm.as_ref() {
        Some(llm) => {
            let mut candidate = llm.clone();
            if candidate.api_key.is_none() {
                candidate.api_key = state.settings.get().await.llm.api_key;
            }
            Some(Arc::new(
                build_analysis_client(&candidate).map_err(|e| e.to_string())?,
            ))
        }
        None => None,
    };

    let mut sections = Vec::new();
    if patch.timing.is_some() {
        sections.push("timing");
    }
    if patch.llm.is_some() {
        sections.push("llm");
    }
    if patch.share.is_some() {
        sections.push("share");
    }
    if patch.log_broadcast.is_some() {
        sections.push("logging");
    }

    let timing = patch.timing.clone();
    let log_broadcast = patch.log_broadcast;
    let updated = state.settings.update(patch).await;

    if timing.is_some() || client.is_some() {
        state
            .session
            .reconfigure(timing, client)
            .await
            .map_err(|e| e.to_string())?;
    }
    if let Some(enabled) = log_broadcast {
        state.log_broadcaster.set_enabled(enabled);
    }

    for section in sections {
        info!("配置已更新: {}", section);
        state.event_bus.publish(AppEvent::ConfigUpdated {
            section: section.to_string(),
        });
    }

    Ok(updated)
}

/// 设置日志推送开关
pub async fn set_log_broadcast(state: &AppState, enabled: bool) -> Result<bool, String> {
    update_settings(
        state,
        SettingsPatch {
            log_broadcast: Some(enabled),
            ..SettingsPatch::default()
        },
    )
    .await?;
    Ok(state.log_broadcaster.is_enabled())
}

/// 获取分析服务状态
pub async fn get_analysis_status(state: &AppState) -> Result<AnalysisStatus, String> {
    let llm = state.settings.get().await.llm;
    Ok(AnalysisStatus {
        configured: llm.has_api_key(),
        provider: llm.provider,
        model: llm.model,
    })
}
