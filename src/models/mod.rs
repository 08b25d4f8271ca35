// 数据模型模块 - 定义用户内容与应用配置

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// 重新导出其他模块的类型
pub use crate::capture::{ContentPreview, ImageAttachment, UserContent};
pub use crate::llm::plugin::AnalysisResult;
pub use crate::llm::LLMConfig;

/// 应用配置（启动时加载，运行期只在内存中更新）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    /// 节奏配置
    #[serde(default)]
    pub timing: TimingConfig,
    /// LLM配置
    #[serde(default)]
    pub llm: LLMConfig,
    /// 分享配置
    #[serde(default)]
    pub share: ShareConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,
}

/// 配置的部分更新，None 表示保持原值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub timing: Option<TimingConfig>,
    pub llm: Option<LLMConfig>,
    pub share: Option<ShareConfig>,
    pub log_broadcast: Option<bool>,
}

/// 界面节奏配置（毫秒）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Analyzing 状态的最短停留时间
    pub analyzing_floor_ms: u64,
    /// 模拟支付确认耗时
    pub payment_processing_ms: u64,
    /// 支付成功后进入 Dashboard 前的揭晓延迟
    pub reveal_delay_ms: u64,
    /// 开场白打完后进入 Input 前的停顿
    pub onboarding_tail_ms: u64,
    /// 打字机每个字符的间隔
    pub typewriter_char_ms: u64,
    /// 打字机每行之间的停顿
    pub typewriter_line_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            analyzing_floor_ms: 3000,
            payment_processing_ms: 1500,
            reveal_delay_ms: 2000,
            onboarding_tail_ms: 1500,
            typewriter_char_ms: 40,
            typewriter_line_delay_ms: 800,
        }
    }
}

impl TimingConfig {
    pub fn analyzing_floor(&self) -> Duration {
        Duration::from_millis(self.analyzing_floor_ms)
    }

    pub fn payment_processing(&self) -> Duration {
        Duration::from_millis(self.payment_processing_ms)
    }

    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }

    pub fn onboarding_tail(&self) -> Duration {
        Duration::from_millis(self.onboarding_tail_ms)
    }

    pub fn typewriter_char(&self) -> Duration {
        Duration::from_millis(self.typewriter_char_ms)
    }

    pub fn typewriter_line_delay(&self) -> Duration {
        Duration::from_millis(self.typewriter_line_delay_ms)
    }
}

/// 分享卡片配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// 回退下载时的输出目录
    pub export_dir: PathBuf,
    /// 导出文件名
    pub file_name: String,
    /// 渲染倍率（1-4）
    pub scale: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("exports"),
            file_name: "nemesis_shame_report.png".to_string(),
            scale: 2,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别（trace/debug/info/warn/error）
    pub level: String,
    /// 日志目录，None 时使用平台默认目录
    pub log_dir: Option<PathBuf>,
    /// 是否写入滚动日志文件
    pub file_output: bool,
    /// 是否通过事件总线推送日志
    pub broadcast: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_output: true,
            broadcast: true,
        }
    }
}
