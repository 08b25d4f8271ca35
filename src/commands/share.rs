//! 分享命令

use tracing::info;

use crate::event_bus::AppEvent;
use crate::share::{ShareCard, ShareOutcome};
use crate::AppState;

/// 导出"翻车报告"图片
///
/// 只有在 Dashboard 中才可用，此时结果和内容都不会再变化。
pub async fn export_shame_report(state: &AppState) -> Result<ShareOutcome, String> {
    let (result, content) = state
        .session
        .export_context()
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "只能在完整报告页分享".to_string())?;

    let card = ShareCard::from_parts(&result, &content);
    let config = state.settings.get().await.share;

    let outcome = state
        .share
        .export(&card, &config)
        .await
        .map_err(|e| format!("生成分享图片失败: {}", e))?;

    info!("分享完成: {}", outcome.target());
    state.event_bus.publish(AppEvent::ShareExported {
        target: outcome.target().to_string(),
        path: outcome.path().cloned(),
    });

    Ok(outcome)
}

/// 预览分享文案（不生成图片）
pub async fn get_share_text(state: &AppState) -> Result<String, String> {
    let (result, content) = state
        .session
        .export_context()
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "只能在完整报告页分享".to_string())?;

    Ok(ShareCard::from_parts(&result, &content).share_text())
}
