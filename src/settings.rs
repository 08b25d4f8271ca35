use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::llm::API_KEY_ENV_VARS;
use crate::models::{AppSettings, SettingsPatch};

/// 覆盖模型名的环境变量
pub const MODEL_ENV_VAR: &str = "NEMESIS_MODEL";

/// 配置来源（日志系统初始化前加载，之后再报告）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    /// 未指定配置文件
    Defaults,
    File(PathBuf),
    /// 文件不存在或为空
    Missing(PathBuf),
    /// 文件无法解析，已退回默认配置
    Invalid { path: PathBuf, error: String },
}

pub struct SettingsManager {
    path: Option<PathBuf>,
    source: SettingsSource,
    data: RwLock<AppSettings>,
}

impl SettingsManager {
    /// 加载配置文件（可选），再叠加环境变量
    pub async fn new(path: Option<PathBuf>) -> Result<Self> {
        let (mut initial, source) = match path.as_deref() {
            Some(path) => load_file(path).await?,
            None => (AppSettings::default(), SettingsSource::Defaults),
        };

        apply_env_overrides(&mut initial);

        Ok(Self {
            path,
            source,
            data: RwLock::new(initial),
        })
    }

    /// 直接使用给定配置（不读文件也不读环境变量）
    pub fn from_settings(settings: AppSettings) -> Self {
        Self {
            path: None,
            source: SettingsSource::Defaults,
            data: RwLock::new(settings),
        }
    }

    pub fn source(&self) -> &SettingsSource {
        &self.source
    }

    /// 报告配置来源；需要在日志系统初始化之后调用
    pub fn log_source(&self) {
        match &self.source {
            SettingsSource::Defaults => info!("未指定配置文件，使用默认配置"),
            SettingsSource::File(path) => info!("已加载配置文件: {:?}", path),
            SettingsSource::Missing(path) => {
                info!("配置文件不存在，使用默认配置: {:?}", path)
            }
            SettingsSource::Invalid { path, error } => {
                warn!("配置文件格式无效，使用默认配置: {:?} ({})", path, error)
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn get(&self) -> AppSettings {
        self.data.read().await.clone()
    }

    /// 仅更新内存中的配置，不回写磁盘
    pub async fn update(&self, patch: SettingsPatch) -> AppSettings {
        let mut config = self.data.write().await;

        if let Some(timing) = patch.timing {
            config.timing = timing;
        }
        if let Some(mut llm) = patch.llm {
            // 渲染端拿不到已有的 key，未提供时沿用
            if llm.api_key.is_none() {
                llm.api_key = config.llm.api_key.take();
            }
            config.llm = llm;
        }
        if let Some(share) = patch.share {
            config.share = share;
        }
        if let Some(enabled) = patch.log_broadcast {
            config.logging.broadcast = enabled;
        }

        config.clone()
    }
}

async fn load_file(path: &Path) -> Result<(AppSettings, SettingsSource)> {
    match tokio::fs::read(path).await {
        Ok(bytes) if !bytes.is_empty() => match serde_json::from_slice::<AppSettings>(&bytes) {
            Ok(settings) => Ok((settings, SettingsSource::File(path.to_path_buf()))),
            Err(e) => Ok((
                AppSettings::default(),
                SettingsSource::Invalid {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                },
            )),
        },
        Ok(_) => Ok((
            AppSettings::default(),
            SettingsSource::Missing(path.to_path_buf()),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((
            AppSettings::default(),
            SettingsSource::Missing(path.to_path_buf()),
        )),
        Err(e) => Err(e).with_context(|| format!("读取配置文件失败: {:?}", path)),
    }
}

fn apply_env_overrides(settings: &mut AppSettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// 环境变量优先于配置文件
pub(crate) fn apply_env_overrides_from<F>(settings: &mut AppSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let key = API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty());
    if let Some(key) = key {
        settings.llm.api_key = Some(key);
    }

    if let Some(model) = lookup(MODEL_ENV_VAR).filter(|m| !m.trim().is_empty()) {
        settings.llm.model = model;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LLMConfig, TimingConfig};
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_key_precedence() {
        let vars = env(&[("API_KEY", "primary"), ("GEMINI_API_KEY", "secondary")]);
        let mut settings = AppSettings::default();
        apply_env_overrides_from(&mut settings, |k| vars.get(k).cloned());
        assert_eq!(settings.llm.api_key.as_deref(), Some("primary"));

        let vars = env(&[("API_KEY", "  "), ("GEMINI_API_KEY", "secondary")]);
        let mut settings = AppSettings::default();
        apply_env_overrides_from(&mut settings, |k| vars.get(k).cloned());
        assert_eq!(settings.llm.api_key.as_deref(), Some("secondary"));
    }

    #[test]
    fn test_env_model_override() {
        let vars = env(&[("NEMESIS_MODEL", "gemini-2.5-flash")]);
        let mut settings = AppSettings::default();
        settings.llm.api_key = Some("from-file".to_string());
        apply_env_overrides_from(&mut settings, |k| vars.get(k).cloned());
        assert_eq!(settings.llm.model, "gemini-2.5-flash");
        assert_eq!(settings.llm.api_key.as_deref(), Some("from-file"));
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{"timing": {"reveal_delay_ms": 10}}"#)
            .await
            .unwrap();

        let (settings, source) = load_file(&path).await.unwrap();
        assert_eq!(source, SettingsSource::File(path.clone()));
        assert_eq!(settings.timing.reveal_delay_ms, 10);
        assert_eq!(
            settings.timing.analyzing_floor_ms,
            TimingConfig::default().analyzing_floor_ms
        );
        assert_eq!(settings.llm.provider, "gemini");
    }

    #[tokio::test]
    async fn test_invalid_or_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing_path = dir.path().join("nope.json");
        let (missing, source) = load_file(&missing_path).await.unwrap();
        assert_eq!(missing.timing, TimingConfig::default());
        assert_eq!(source, SettingsSource::Missing(missing_path));

        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let (broken, source) = load_file(&path).await.unwrap();
        assert_eq!(broken.timing, TimingConfig::default());
        assert!(matches!(source, SettingsSource::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_invalid_file_warning_logged_after_init() {
        use crate::event_bus::{AppEvent, EventBus};
        use crate::logger::{EventBusLogLayer, LogBroadcaster};
        use std::sync::Arc;
        use tracing_subscriber::layer::SubscriberExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, r#"{"llm": {"api_key": "#).await.unwrap();

        // 加载时还没有日志订阅者
        let manager = SettingsManager::new(Some(path.clone())).await.unwrap();
        match manager.source() {
            SettingsSource::Invalid { path: p, error } => {
                assert_eq!(p, &path);
                assert!(!error.is_empty());
            }
            other => panic!("unexpected source: {:?}", other),
        }

        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let broadcaster = Arc::new(LogBroadcaster::new());
        broadcaster.set_event_bus(bus.clone());
        let subscriber = tracing_subscriber::registry().with(EventBusLogLayer::new(broadcaster));
        tracing::subscriber::with_default(subscriber, || manager.log_source());

        match rx.try_recv().unwrap() {
            AppEvent::Log(log) => {
                assert_eq!(log.level, "WARN");
                assert!(log.message.contains("配置文件格式无效"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_keeps_existing_key() {
        let mut initial = AppSettings::default();
        initial.llm.api_key = Some("secret".to_string());
        let manager = SettingsManager::from_settings(initial);

        let updated = manager
            .update(SettingsPatch {
                llm: Some(LLMConfig {
                    model: "gemini-2.5-pro".to_string(),
                    ..LLMConfig::default()
                }),
                log_broadcast: Some(false),
                ..SettingsPatch::default()
            })
            .await;

        assert_eq!(updated.llm.model, "gemini-2.5-pro");
        assert_eq!(updated.llm.api_key.as_deref(), Some("secret"));
        assert!(!updated.logging.broadcast);
        assert_eq!(manager.get().await.llm.model, "gemini-2.5-pro");
    }
}
