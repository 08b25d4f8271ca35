use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::AnalysisError;
use crate::capture::UserContent;

/// 评分取值范围
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// 远端服务返回的结构化评判
///
/// 字段名与服务契约保持一致（camelCase）。所有字段都是必填的，
/// 缺失任何一个都视为契约违规。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// 总体翻车程度 0-100
    #[serde(deserialize_with = "deserialize_score")]
    pub oof_score: f64,
    /// 一句小写的冷嘲热讽
    pub roast: String,
    /// 过时程度 0-100
    #[serde(deserialize_with = "deserialize_score")]
    pub cringe_clock: f64,
    /// 无意中的双关或隐藏含义
    #[serde(deserialize_with = "deserialize_string_list")]
    pub innocence_issues: Vec<String>,
    /// 品牌自毁风险 0-100
    #[serde(deserialize_with = "deserialize_score")]
    pub brand_suicide_score: f64,
    /// 致命错误（数量不固定）
    #[serde(deserialize_with = "deserialize_string_list")]
    pub lethal_errors: Vec<String>,
    /// 补救方向
    #[serde(deserialize_with = "deserialize_string_list")]
    pub pivot_options: Vec<String>,
    /// 改写后的安全版本
    pub clean_version: String,
}

impl AnalysisResult {
    /// 把分数夹到 [0, 100]
    pub fn normalized(mut self) -> Self {
        self.oof_score = clamp_score(self.oof_score);
        self.cringe_clock = clamp_score(self.cringe_clock);
        self.brand_suicide_score = clamp_score(self.brand_suicide_score);
        self
    }

    /// 分享文案中使用的整数百分比
    pub fn oof_percent(&self) -> u8 {
        clamp_score(self.oof_score).round() as u8
    }
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(SCORE_MIN, SCORE_MAX)
}

/// 分数兼容数字和数字字符串（如 "42"），非有限值直接拒绝
fn deserialize_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    let number = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(D::Error::custom(format!("无效的分数: {}", value))),
    }
}

/// 列表兼容 null、单个字符串和字符串数组
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![s.to_string()])
            }
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(D::Error::custom(format!("列表元素不是字符串: {}", other))),
            })
            .collect(),
        other => Err(D::Error::custom(format!("期望字符串列表: {}", other))),
    }
}

/// 评判服务提供商接口
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// 分析用户内容
    ///
    /// # 参数
    /// * `content` - 文本和/或单张图片
    ///
    /// # 返回
    /// * 结构化评判，失败时返回分类后的错误
    async fn analyze(&self, content: &UserContent) -> Result<AnalysisResult, AnalysisError>;

    /// 获取提供商名称
    fn name(&self) -> &str;

    /// 凭证是否就绪
    fn is_configured(&self) -> bool;
}
