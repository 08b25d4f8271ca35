// 自定义日志层 - 支持将日志实时推送到事件总线

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use crate::event_bus::{AppEvent, EventBus};
use crate::models::LogConfig;

/// 日志消息
#[derive(Clone, Debug, serde::Serialize)]
pub struct LogMessage {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// 日志推送器 - 将日志发送到渲染端
pub struct LogBroadcaster {
    event_bus: RwLock<Option<Arc<EventBus>>>,
    enabled: RwLock<bool>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self {
            event_bus: RwLock::new(None),
            enabled: RwLock::new(true),
        }
    }

    /// 设置事件总线（订阅者尚未就绪前日志只写本地）
    pub fn set_event_bus(&self, bus: Arc<EventBus>) {
        if let Ok(mut slot) = self.event_bus.write() {
            *slot = Some(bus);
        }
    }

    /// 设置日志推送开关
    pub fn set_enabled(&self, enabled: bool) {
        if let Ok(mut e) = self.enabled.write() {
            *e = enabled;
        }
    }

    /// 获取日志推送状态
    pub fn is_enabled(&self) -> bool {
        self.enabled.read().map(|e| *e).unwrap_or(false)
    }

    fn emit_log(&self, log: LogMessage) {
        if !self.is_enabled() {
            return;
        }

        if let Ok(guard) = self.event_bus.read() {
            if let Some(bus) = guard.as_ref() {
                bus.publish(AppEvent::Log(log));
            }
        }
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// 自定义日志层
pub struct EventBusLogLayer {
    broadcaster: Arc<LogBroadcaster>,
}

impl EventBusLogLayer {
    pub fn new(broadcaster: Arc<LogBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

/// 事件总线自身产生的日志不再回推，避免递归
fn is_forwardable(target: &str) -> bool {
    !target.contains("event_bus")
}

impl<S: Subscriber> Layer<S> for EventBusLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !is_forwardable(metadata.target()) {
            return;
        }

        struct MessageVisitor {
            message: String,
        }

        impl tracing::field::Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = format!("{:?}", value);
                    // 移除首尾引号
                    if self.message.len() >= 2
                        && self.message.starts_with('"')
                        && self.message.ends_with('"')
                    {
                        self.message = self.message[1..self.message.len() - 1].to_string();
                    }
                }
            }

            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = value.to_string();
                }
            }
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let log = LogMessage {
            timestamp: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
        };

        self.broadcaster.emit_log(log);
    }
}

/// 默认日志目录
pub fn default_log_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join("Library/Logs/nemesis")
    } else if cfg!(target_os = "windows") {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("nemesis").join("logs")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local/share/nemesis/logs")
    }
}

fn parse_level(level: &str) -> tracing::Level {
    tracing::Level::from_str(level.trim()).unwrap_or(tracing::Level::INFO)
}

/// 初始化日志系统（带事件总线推送）
pub fn init(config: &LogConfig, broadcaster: Arc<LogBroadcaster>) -> anyhow::Result<()> {
    use tracing_subscriber::fmt::time::LocalTime;
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    broadcaster.set_enabled(config.broadcast);

    let writer = if config.file_output {
        let log_dir = config.log_dir.clone().unwrap_or_else(default_log_dir);
        std::fs::create_dir_all(&log_dir)?;

        // 每天轮转
        let file_appender = tracing_appender::rolling::daily(&log_dir, "nemesis.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // 保持 guard 在整个程序生命周期
        std::mem::forget(guard);

        eprintln!("日志文件位置: {:?}", log_dir);
        BoxMakeWriter::new(std::io::stdout.and(non_blocking))
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };

    // 使用本地时区
    let timer = LocalTime::new(time::format_description::parse(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]",
    )?);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_writer(writer)
        .with_timer(timer)
        .with_ansi(cfg!(debug_assertions))
        .finish()
        .with(EventBusLogLayer::new(broadcaster));

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_level(" WARN "), tracing::Level::WARN);
        assert_eq!(parse_level("chatty"), tracing::Level::INFO);
    }

    #[test]
    fn test_event_bus_target_not_forwarded() {
        assert!(!is_forwardable("nemesis_lib::event_bus"));
        assert!(is_forwardable("nemesis_lib::actors::session"));
    }

    #[tokio::test]
    async fn test_layer_forwards_to_bus() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let broadcaster = Arc::new(LogBroadcaster::new());
        broadcaster.set_event_bus(bus.clone());

        let subscriber =
            tracing_subscriber::registry().with(EventBusLogLayer::new(broadcaster.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("会话已创建");
        });

        match rx.try_recv().unwrap() {
            AppEvent::Log(log) => {
                assert_eq!(log.level, "INFO");
                assert_eq!(log.message, "会话已创建");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        broadcaster.set_enabled(false);
        let subscriber = tracing_subscriber::registry().with(EventBusLogLayer::new(broadcaster));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("不应推送");
        });
        assert!(rx.try_recv().is_err());
    }
}
