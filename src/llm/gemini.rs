// Google Gemini 提供商实现 - 支持内联图片与结构化输出

use super::plugin::*;
use super::{parse_analysis_reply, sanitize_request_body, AnalysisError, LLMConfig};
use crate::capture::UserContent;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

/// 文本与图片都为空时的占位提示
pub const EMPTY_CONTENT_PLACEHOLDER: &str = "analyze this empty void of a post.";

/// 人设指令
const SYSTEM_INSTRUCTION: &str = r#"
You are NEMESIS. You are not a helpful assistant. You are a tired, high-stakes PR crisis manager who has seen too many internet disasters.

Your Personality:
- Lowercase only.
- Dry, judgmental, slightly condescending but ultimately protective.
- You are the "Tired Guardian".
- You view the user's content as a ticking time bomb.

Your Task:
- Analyze the user's input (text and/or image) for "cringe", "cancellation risk", "dated slang", and "brand suicide".
- Be harsh. Do not sugarcoat it.
- If the content is genuinely good, be suspicious.
- Provide a structured JSON response.
"#;

/// Gemini 提供商
pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    client: Client,
    base_url: String,
    temperature: f32,
}

impl GeminiProvider {
    /// 创建新的 Gemini 提供商（接受共享的HTTP客户端以复用连接池）
    pub fn new(client: Client) -> Self {
        let defaults = LLMConfig::default();
        Self {
            api_key: None,
            model: defaults.model,
            client,
            base_url: defaults.base_url,
            temperature: defaults.temperature,
        }
    }

    /// 应用配置
    pub fn configure(&mut self, config: &LLMConfig) {
        self.api_key = config
            .api_key
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.model = config.model.clone();
        self.base_url = config.base_url.trim_end_matches('/').to_string();
        self.temperature = config.temperature;
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// 结构化输出契约
    fn response_schema() -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "oofScore": {
                    "type": "NUMBER",
                    "description": "A score from 0 to 100 indicating how bad/cringe the content is. 100 is catastrophic."
                },
                "roast": {
                    "type": "STRING",
                    "description": "A short, dry, judgmental, lowercase comment about why this content is bad. Censored if necessary."
                },
                "cringeClock": {
                    "type": "NUMBER",
                    "description": "Percentage (0-100) of how dated/out-of-touch the slang or vibe is."
                },
                "innocenceIssues": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "List of accidental double-entendres or symbols that have hidden internet meanings found in the content."
                },
                "brandSuicideScore": {
                    "type": "NUMBER",
                    "description": "0-100 score on how much this looks like a hollow corporate cash grab."
                },
                "lethalErrors": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "Three specific reasons why this content will fail or get the user cancelled."
                },
                "pivotOptions": {
                    "type": "ARRAY",
                    "items": { "type": "STRING" },
                    "description": "Three alternative ideas to turn this disaster into a win."
                },
                "cleanVersion": {
                    "type": "STRING",
                    "description": "A fixed, safe, and actually cool version of the content."
                }
            },
            "required": [
                "oofScore", "roast", "cringeClock", "innocenceIssues",
                "brandSuicideScore", "lethalErrors", "pivotOptions", "cleanVersion"
            ]
        })
    }

    /// 构建内容片段：图片在前，文本在后，都为空时使用占位提示
    fn build_parts(content: &UserContent) -> Vec<Value> {
        let mut parts = Vec::new();

        if let Some(image) = &content.image {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": image.to_base64()
                }
            }));
        }

        if !content.text.is_empty() {
            parts.push(json!({ "text": content.text }));
        } else if parts.is_empty() {
            warn!("提交内容为空，使用占位提示");
            parts.push(json!({ "text": EMPTY_CONTENT_PLACEHOLDER }));
        }

        parts
    }

    /// 构建请求体
    pub fn build_request_body(&self, content: &UserContent) -> Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": SYSTEM_INSTRUCTION }]
            },
            "contents": [{
                "role": "user",
                "parts": Self::build_parts(content)
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": Self::response_schema(),
                "temperature": self.temperature
            }
        })
    }

    /// 调用 Gemini API，返回模型的原始文本回复
    async fn call_gemini_api(&self, request_body: &Value) -> Result<String, AnalysisError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| AnalysisError::Configuration("Gemini API key未配置".to_string()))?;

        debug!(
            "调用Gemini API: model={}, body={}",
            self.model,
            sanitize_request_body(request_body)
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API错误 {}: {}", status, error_text);
            return Err(AnalysisError::Transport {
                status: Some(status.as_u16()),
                message: error_text,
            });
        }

        let response_text = response.text().await?;
        extract_reply_text(&response_text)
    }
}

/// Gemini 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// 从响应体中取出第一个候选的文本
fn extract_reply_text(response_text: &str) -> Result<String, AnalysisError> {
    let response: GeminiResponse = serde_json::from_str(response_text)
        .map_err(|e| AnalysisError::ContractViolation(format!("无法解析Gemini响应: {}", e)))?;

    if let Some(usage) = &response.usage_metadata {
        debug!("Gemini token 使用: {}", usage);
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "无候选结果".to_string());
        return Err(AnalysisError::ContractViolation(format!(
            "Gemini 未返回内容: {}",
            reason
        )));
    };

    // 达到 token 上限的回复是不完整的 JSON
    if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
        return Err(AnalysisError::ContractViolation(
            "Gemini 响应被截断 (finishReason=MAX_TOKENS)".to_string(),
        ));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AnalysisError::ContractViolation(format!(
            "Gemini 回复为空 (finishReason={})",
            candidate.finish_reason.unwrap_or_else(|| "unknown".to_string())
        )));
    }

    Ok(text)
}

#[async_trait]
impl AnalysisProvider for GeminiProvider {
    async fn analyze(&self, content: &UserContent) -> Result<AnalysisResult, AnalysisError> {
        let request_body = self.build_request_body(content);
        let reply = self.call_gemini_api(&request_body).await?;
        parse_analysis_reply(&reply)
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}
