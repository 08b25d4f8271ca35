// 分享模块 - 生成"翻车报告"卡片并导出
//
// 卡片固定布局：黑底、红色分隔线、三条评分条和列表计数方块。
// 平台分享面板可以通过 ShareTarget 接入，默认退化为写入导出目录。

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::UserContent;
use crate::llm::plugin::AnalysisResult;
use crate::models::ShareConfig;

/// 分享标题
pub const SHARE_TITLE: &str = "NEMESIS Vibe Check";

/// 卡片基础尺寸（scale = 1）
pub const CARD_WIDTH: u32 = 1080;
pub const CARD_HEIGHT: u32 = 1350;

/// 导出倍率上限，防止生成过大的图片
const MAX_SCALE: u32 = 4;

/// 每个列表最多画多少个方块
const MAX_BLOCKS: usize = 15;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const ACCENT: Rgba<u8> = Rgba([220, 38, 38, 255]);
const TRACK: Rgba<u8> = Rgba([38, 38, 38, 255]);
const MUTED: Rgba<u8> = Rgba([115, 115, 115, 255]);
const WARNING: Rgba<u8> = Rgba([234, 179, 8, 255]);
const SAFE: Rgba<u8> = Rgba([34, 197, 94, 255]);

/// 分享卡片的数据（来自 Dashboard 中不可变的结果和内容）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareCard {
    pub oof_score: f64,
    pub cringe_clock: f64,
    pub brand_suicide_score: f64,
    pub roast: String,
    pub innocence_count: usize,
    pub lethal_count: usize,
    pub pivot_count: usize,
    /// 原帖节选，和 roast 一起进入分享载荷的替代文本
    pub excerpt: String,
    /// 原帖带图时卡片右上角画一个标记
    pub has_image: bool,
}

impl ShareCard {
    pub fn from_parts(result: &AnalysisResult, content: &UserContent) -> Self {
        Self {
            oof_score: result.oof_score,
            cringe_clock: result.cringe_clock,
            brand_suicide_score: result.brand_suicide_score,
            roast: result.roast.clone(),
            innocence_count: result.innocence_issues.len(),
            lethal_count: result.lethal_errors.len(),
            pivot_count: result.pivot_options.len(),
            excerpt: excerpt(&content.text, 140),
            has_image: content.image.is_some(),
        }
    }

    fn oof_percent(&self) -> u8 {
        self.oof_score.clamp(0.0, 100.0).round() as u8
    }

    /// 分享文案
    pub fn share_text(&self) -> String {
        format!(
            "i just got roasted by NEMESIS. {}% cringe detected. read the report.",
            self.oof_percent()
        )
    }

    /// 图片的替代文本（分享面板和读屏使用）
    pub fn alt_text(&self) -> String {
        let mut text = format!("NEMESIS vibe audit, {}% oof.", self.oof_percent());
        if !self.roast.trim().is_empty() {
            text.push_str(&format!(" \"{}\"", self.roast.trim()));
        }
        if !self.excerpt.is_empty() {
            text.push_str(&format!(" post: {}", self.excerpt));
        }
        if self.has_image {
            text.push_str(" [image attached]");
        }
        text
    }

    /// 渲染为 PNG
    pub fn render_png(&self, scale: u32) -> Result<Vec<u8>> {
        let canvas = self.render(scale);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .context("PNG编码失败")?;
        Ok(bytes)
    }

    fn render(&self, scale: u32) -> RgbaImage {
        let mut canvas = Canvas::new(scale.clamp(1, MAX_SCALE));

        // 顶部分隔线
        canvas.fill(64, 220, 952, 12, ACCENT);

        if self.has_image {
            canvas.fill(952, 120, 64, 64, MUTED);
        }

        canvas.gauge(360, self.oof_score, ACCENT);
        canvas.gauge(480, self.cringe_clock, WARNING);
        canvas.gauge(600, self.brand_suicide_score, ACCENT);

        canvas.blocks(800, self.innocence_count, WARNING);
        canvas.blocks(900, self.lethal_count, ACCENT);
        canvas.blocks(1000, self.pivot_count, SAFE);

        // 底部分隔线
        canvas.fill(64, 1250, 952, 4, MUTED);

        canvas.image
    }
}

/// 按字符截断，避免切断多字节字符
fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

/// 以基础坐标绘制，内部统一乘以倍率
struct Canvas {
    image: RgbaImage,
    scale: u32,
}

impl Canvas {
    fn new(scale: u32) -> Self {
        Self {
            image: RgbaImage::from_pixel(CARD_WIDTH * scale, CARD_HEIGHT * scale, BACKGROUND),
            scale,
        }
    }

    fn fill(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgba<u8>) {
        let (width, height) = self.image.dimensions();
        let x0 = (x * self.scale).min(width);
        let y0 = (y * self.scale).min(height);
        let x1 = ((x + w) * self.scale).min(width);
        let y1 = ((y + h) * self.scale).min(height);

        for py in y0..y1 {
            for px in x0..x1 {
                self.image.put_pixel(px, py, color);
            }
        }
    }

    /// 一条评分条：灰色轨道 + 按分数填充
    fn gauge(&mut self, y: u32, score: f64, color: Rgba<u8>) {
        const TRACK_WIDTH: u32 = 952;
        self.fill(64, y, TRACK_WIDTH, 60, TRACK);
        let filled = (score.clamp(0.0, 100.0) / 100.0 * TRACK_WIDTH as f64).round() as u32;
        self.fill(64, y, filled, 60, color);
    }

    /// 列表计数：每项一个方块
    fn blocks(&mut self, y: u32, count: usize, color: Rgba<u8>) {
        for i in 0..count.min(MAX_BLOCKS) as u32 {
            self.fill(64 + i * 56, y, 40, 40, color);
        }
    }
}

/// 交给分享目标的载荷
#[derive(Debug, Clone)]
pub struct SharePayload {
    pub title: String,
    pub text: String,
    pub file_name: String,
    pub alt_text: String,
    pub mime_type: &'static str,
    pub png: Vec<u8>,
}

/// 分享结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "path", rename_all = "camelCase")]
pub enum ShareOutcome {
    /// 平台分享面板已完成
    Shared,
    /// 已写入文件
    Downloaded(PathBuf),
    /// 用户取消了分享面板
    Cancelled,
}

impl ShareOutcome {
    pub fn target(&self) -> &'static str {
        match self {
            ShareOutcome::Shared => "share",
            ShareOutcome::Downloaded(_) => "download",
            ShareOutcome::Cancelled => "cancelled",
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ShareOutcome::Downloaded(path) => Some(path),
            _ => None,
        }
    }
}

/// 分享目标（平台分享面板、文件下载等）
#[async_trait]
pub trait ShareTarget: Send + Sync {
    fn name(&self) -> &str;

    /// 是否能分享这个载荷（例如平台不支持文件）
    fn can_share(&self, payload: &SharePayload) -> bool;

    async fn share(&self, payload: &SharePayload) -> Result<ShareOutcome>;
}

/// 默认目标：把 PNG 写入导出目录
pub struct DownloadTarget {
    dir: PathBuf,
}

impl DownloadTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ShareTarget for DownloadTarget {
    fn name(&self) -> &str {
        "download"
    }

    fn can_share(&self, _payload: &SharePayload) -> bool {
        true
    }

    async fn share(&self, payload: &SharePayload) -> Result<ShareOutcome> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("创建导出目录失败: {:?}", self.dir))?;

        let path = self.dir.join(&payload.file_name);
        tokio::fs::write(&path, &payload.png)
            .await
            .with_context(|| format!("写入分享图片失败: {:?}", path))?;

        info!("分享图片已保存: {:?}", path);
        Ok(ShareOutcome::Downloaded(path))
    }
}

/// 分享服务：优先平台分享，不可用时退化为下载
#[derive(Clone, Default)]
pub struct ShareService {
    primary: Option<Arc<dyn ShareTarget>>,
}

impl ShareService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(primary: Arc<dyn ShareTarget>) -> Self {
        Self {
            primary: Some(primary),
        }
    }

    pub async fn export(&self, card: &ShareCard, config: &ShareConfig) -> Result<ShareOutcome> {
        let scale = config.scale;
        let render_card = card.clone();
        let png = tokio::task::spawn_blocking(move || render_card.render_png(scale))
            .await
            .context("渲染任务异常退出")??;

        let payload = SharePayload {
            title: SHARE_TITLE.to_string(),
            text: card.share_text(),
            file_name: config.file_name.clone(),
            alt_text: card.alt_text(),
            mime_type: "image/png",
            png,
        };

        if let Some(primary) = self.primary.as_ref().filter(|t| t.can_share(&payload)) {
            return match primary.share(&payload).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    // 分享面板被关闭不算失败
                    warn!("分享已取消 ({}): {}", primary.name(), e);
                    Ok(ShareOutcome::Cancelled)
                }
            };
        }

        DownloadTarget::new(&config.export_dir).share(&payload).await
    }
}
