// LLM模块 - 管理内容评判服务

pub mod gemini;
pub mod plugin;

pub use gemini::GeminiProvider;
pub use plugin::{AnalysisProvider, AnalysisResult};

use crate::capture::UserContent;
use llm_json::{loads, repair_json, RepairOptions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 环境变量中的 API key（按顺序查找）
pub const API_KEY_ENV_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

/// 分析错误分类
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    /// 凭证缺失，任何真实调用之前就失败
    #[error("API key 未配置: {0}")]
    Configuration(String),
    /// 网络错误、非 2xx、超时
    #[error("评判服务调用失败{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// 返回内容不符合结构化契约
    #[error("评判结果不符合契约: {0}")]
    ContractViolation(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Configuration(_) => "configuration",
            AnalysisError::Transport { .. } => "transport",
            AnalysisError::ContractViolation(_) => "contract_violation",
        }
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// LLM配置
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    /// 当前使用的 provider，目前只有 "gemini"
    pub provider: String,
    /// API key，优先使用环境变量
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    /// 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: None,
            model: "gemini-3-pro-preview".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

impl std::fmt::Debug for LLMConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LLMConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl LLMConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

/// 分析客户端
///
/// 包装具体的 provider，负责前置的凭证检查、结果归一化和日志。
/// 所有失败都以 `AnalysisError` 返回，由会话状态机决定如何呈现。
pub struct AnalysisClient {
    provider: Arc<dyn AnalysisProvider>,
}

impl AnalysisClient {
    pub fn new(provider: Arc<dyn AnalysisProvider>) -> Self {
        Self { provider }
    }

    /// 按配置创建客户端（共享 HTTP 客户端以复用连接池）
    pub fn from_config(config: &LLMConfig, http: reqwest::Client) -> anyhow::Result<Self> {
        match config.provider.as_str() {
            "gemini" => {
                let mut provider = GeminiProvider::new(http);
                provider.configure(config);
                if !provider.is_configured() {
                    warn!("Gemini API key 未配置，分析请求将直接失败");
                }
                Ok(Self::new(Arc::new(provider)))
            }
            other => Err(anyhow::anyhow!("不支持的 LLM provider: {}", other)),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    /// 执行一次分析
    pub async fn analyze(&self, content: &UserContent) -> Result<AnalysisResult, AnalysisError> {
        if !self.provider.is_configured() {
            return Err(AnalysisError::Configuration(format!(
                "{} 缺少凭证，请设置 {}",
                self.provider.name(),
                API_KEY_ENV_VARS.join(" 或 ")
            )));
        }

        let start = Instant::now();
        info!(
            "开始分析: provider={}, 文本 {} 字符, 图片: {}",
            self.provider.name(),
            content.text.chars().count(),
            content.image.is_some()
        );

        match self.provider.analyze(content).await {
            Ok(result) => {
                let result = result.normalized();
                if result.lethal_errors.is_empty() {
                    warn!("评判结果没有给出 lethalErrors");
                }
                info!(
                    "分析完成: oof={}, 耗时 {}ms",
                    result.oof_score,
                    start.elapsed().as_millis()
                );
                Ok(result)
            }
            Err(e) => {
                error!(
                    "分析失败 ({}), 耗时 {}ms: {}",
                    e.kind(),
                    start.elapsed().as_millis(),
                    e
                );
                Err(e)
            }
        }
    }
}

/// 把模型的文本回复解析为结构化评判
pub fn parse_analysis_reply(reply: &str) -> Result<AnalysisResult, AnalysisError> {
    let value = extract_json(reply)?;
    let value = match value {
        // 个别模型会把 JSON 再包一层字符串
        Value::String(inner) => extract_json(&inner)?,
        other => other,
    };

    serde_json::from_value::<AnalysisResult>(value)
        .map_err(|e| AnalysisError::ContractViolation(format!("JSON 结构不符合预期: {}", e)))
}

/// 解析 JSON 响应
///
/// 支持多种格式：
/// 1. 纯 JSON: `{...}`
/// 2. Markdown 代码块: ` ```json\n{...}\n``` `
/// 3. 包含其他文本的响应，提取第一个 `{` 到最后一个 `}`
/// 4. 以上都失败时尝试修复 JSON
pub fn extract_json(response: &str) -> Result<Value, AnalysisError> {
    let response = response.trim();
    if response.is_empty() {
        return Err(AnalysisError::ContractViolation("回复为空".to_string()));
    }

    match serde_json::from_str::<Value>(response) {
        Ok(value) => return Ok(value),
        Err(e) => debug!("直接解析 JSON 失败: {}", e),
    }

    if let Some(start_marker) = response.find("```") {
        let after_marker = &response[start_marker + 3..];

        // 跳过语言标识（如 "json"）到下一行
        let content_start = match after_marker.find('\n') {
            Some(newline_pos) => start_marker + 3 + newline_pos + 1,
            None => start_marker + 3,
        };

        if let Some(end_pos) = response[content_start..].find("```") {
            let json_str = response[content_start..content_start + end_pos].trim();
            match serde_json::from_str::<Value>(json_str) {
                Ok(value) => return Ok(value),
                Err(e) => debug!("从代码块提取 JSON 失败: {}", e),
            }
        }
    }

    let candidate = match (response.find('{'), response.rfind('}')) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => response,
    };

    if let Ok(value) = serde_json::from_str::<Value>(candidate) {
        return Ok(value);
    }

    warn!("JSON 解析失败，尝试修复");
    let repaired = repair_json(candidate, &RepairOptions::default())
        .map_err(|e| AnalysisError::ContractViolation(format!("无法修复返回的 JSON: {}", e)))?;
    let value = loads(&repaired, &RepairOptions::default())
        .map_err(|e| AnalysisError::ContractViolation(format!("解析修复后的 JSON 失败: {}", e)))?;

    if value.is_object() {
        Ok(value)
    } else {
        Err(AnalysisError::ContractViolation(
            "无法从回复中提取 JSON 对象".to_string(),
        ))
    }
}

/// 清理 request_body 中的图片 base64 数据，便于写日志
///
/// Gemini 格式：`inlineData.data` -> "[BASE64_REMOVED: N chars]"
pub fn sanitize_request_body(value: &Value) -> String {
    fn remove_base64(val: &Value) -> Value {
        match val {
            Value::Object(map) => {
                let mut new_map = serde_json::Map::new();
                for (key, v) in map {
                    if key == "inlineData" {
                        if let Value::Object(inline) = v {
                            let mut sanitized = inline.clone();
                            if let Some(Value::String(data)) = inline.get("data") {
                                sanitized.insert(
                                    "data".to_string(),
                                    Value::String(format!("[BASE64_REMOVED: {} chars]", data.len())),
                                );
                            }
                            new_map.insert(key.clone(), Value::Object(sanitized));
                            continue;
                        }
                    }
                    new_map.insert(key.clone(), remove_base64(v));
                }
                Value::Object(new_map)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(remove_base64).collect()),
            _ => val.clone(),
        }
    }

    serde_json::to_string(&remove_base64(value)).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 返回固定结果的 provider，可选模拟延迟
    pub struct StaticProvider {
        outcome: Result<AnalysisResult, AnalysisError>,
        delay: Duration,
        configured: bool,
        pub calls: AtomicUsize,
    }

    impl StaticProvider {
        pub fn ok(result: AnalysisResult) -> Self {
            Self {
                outcome: Ok(result),
                delay: Duration::ZERO,
                configured: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn err(error: AnalysisError) -> Self {
            Self {
                outcome: Err(error),
                delay: Duration::ZERO,
                configured: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn unconfigured(mut self) -> Self {
            self.configured = false;
            self
        }
    }

    #[async_trait]
    impl AnalysisProvider for StaticProvider {
        async fn analyze(&self, _content: &UserContent) -> Result<AnalysisResult, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }

        fn name(&self) -> &str {
            "static"
        }

        fn is_configured(&self) -> bool {
            self.configured
        }
    }

    /// 场景 A 中的评判结果
    pub fn scenario_result() -> AnalysisResult {
        AnalysisResult {
            oof_score: 42.0,
            roast: "meh".to_string(),
            cringe_clock: 10.0,
            innocence_issues: vec![],
            brand_suicide_score: 5.0,
            lethal_errors: vec!["a".to_string(), "b".to_string()],
            pivot_options: vec!["x".to_string(), "y".to_string(), "z".to_string()],
            clean_version: "Hello World!".to_string(),
        }
    }
}
