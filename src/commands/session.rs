//! 会话命令
//!
//! 每个意图执行后返回最新快照，渲染层据此重绘。
//! 非法意图（例如 Analyzing 中再次提交）返回错误，会话状态不变。

use std::path::PathBuf;

use crate::actors::{SessionError, SessionSnapshot};
use crate::capture::{self, ImageAttachment};
use crate::AppState;

async fn snapshot_after(
    state: &AppState,
    result: Result<impl Sized, SessionError>,
) -> Result<SessionSnapshot, String> {
    result.map_err(|e| e.to_string())?;
    get_session_snapshot(state).await
}

/// 获取会话快照
pub async fn get_session_snapshot(state: &AppState) -> Result<SessionSnapshot, String> {
    state.session.snapshot().await.map_err(|e| e.to_string())
}

/// 播放开场动画
pub async fn start_onboarding(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.start_onboarding().await;
    snapshot_after(state, result).await
}

/// 跳过开场
pub async fn skip_onboarding(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.skip_onboarding().await;
    snapshot_after(state, result).await
}

/// 更新输入文本
pub async fn set_text(state: &AppState, text: String) -> Result<SessionSnapshot, String> {
    let result = state.session.set_text(text).await;
    snapshot_after(state, result).await
}

/// 从文件附加图片
pub async fn attach_image_file(state: &AppState, path: PathBuf) -> Result<SessionSnapshot, String> {
    let image = capture::load_image_file(&path)
        .await
        .map_err(|e| e.to_string())?;
    let result = state.session.set_image(image).await;
    snapshot_after(state, result).await
}

/// 直接附加图片数据（例如粘贴板）
pub async fn attach_image_bytes(
    state: &AppState,
    bytes: Vec<u8>,
    mime_type: Option<String>,
) -> Result<SessionSnapshot, String> {
    let mime_type = mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| capture::infer_mime_type(&bytes, std::path::Path::new("")));
    let result = state
        .session
        .set_image(ImageAttachment::new(bytes, mime_type))
        .await;
    snapshot_after(state, result).await
}

/// 移除图片
pub async fn remove_image(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.remove_image().await;
    snapshot_after(state, result).await
}

/// 提交评判
pub async fn submit_content(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.submit().await;
    snapshot_after(state, result).await
}

/// 查看完整报告（进入付费墙）
pub async fn view_full_report(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.view_full_report().await;
    snapshot_after(state, result).await
}

pub async fn open_payment_modal(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.open_payment_modal().await;
    snapshot_after(state, result).await
}

pub async fn close_payment_modal(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.close_payment_modal().await;
    snapshot_after(state, result).await
}

/// 确认（模拟）付费
pub async fn confirm_payment(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.confirm_payment().await;
    snapshot_after(state, result).await
}

/// 拒绝付费，回到预览
pub async fn decline_payment(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.decline_payment().await;
    snapshot_after(state, result).await
}

/// 从报告页开始新的评判
pub async fn start_new_session(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.start_new_session().await;
    snapshot_after(state, result).await
}

/// 任意状态下重置会话
pub async fn reset_session(state: &AppState) -> Result<SessionSnapshot, String> {
    let result = state.session.reset().await;
    snapshot_after(state, result).await
}
