// 事件总线 - 核心向渲染层推送状态变化
//
// 实现发布/订阅模式,渲染层只读快照和事件,通过命令回传用户意图
// 使用 tokio::sync::broadcast 实现高效的事件分发

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::llm::AnalysisResult;
use crate::logger::LogMessage;
use crate::session::StateKind;
use crate::typewriter::TypewriterFrame;

/// 应用事件枚举 - 定义所有可能的系统事件
#[derive(Debug, Clone)]
pub enum AppEvent {
    // --- 会话事件 ---

    /// 状态切换
    StateChanged {
        session_id: String,
        from: StateKind,
        to: StateKind,
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// 需要展示给用户的提示（阻塞式弹窗）
    Notice {
        message: String,
    },

    /// 开场白打字机帧
    Typewriter(TypewriterFrame),

    // --- 分析事件 ---

    /// 分析开始事件
    AnalysisStarted {
        session_id: String,
    },

    /// 分析完成事件
    AnalysisCompleted {
        session_id: String,
        result: Arc<AnalysisResult>,
    },

    /// 分析失败事件
    AnalysisFailed {
        session_id: String,
        error: String,
    },

    // --- 支付事件 ---

    /// 支付成功（渲染层播放音效并开始两段式揭晓）
    PaymentSucceeded {
        session_id: String,
    },

    // --- 系统事件 ---

    /// 分享卡片已导出
    ShareExported {
        target: String,
        path: Option<PathBuf>,
    },

    /// 配置更新事件
    ConfigUpdated {
        section: String,
    },

    /// 日志行
    Log(LogMessage),
}

/// 事件总线
///
/// 使用 broadcast channel 实现发布/订阅模式
/// 支持多个订阅者同时接收事件
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    ///
    /// # 参数
    /// - `capacity`: 事件缓冲区大小,打字机帧较多,建议 256 以上
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// 发布事件
    ///
    /// 如果没有订阅者,事件会被丢弃(这是正常的)
    pub fn publish(&self, event: AppEvent) {
        match self.sender.send(event) {
            Ok(receiver_count) => {
                tracing::trace!("事件已发布，订阅者数量: {}", receiver_count);
            }
            Err(_) => {
                tracing::trace!("事件已发布但无订阅者");
            }
        }
    }

    /// 订阅事件
    ///
    /// 返回一个接收器,可以用 `.recv().await` 接收事件
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// 获取当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_basic() {
        let bus = EventBus::new(100);
        let mut receiver = bus.subscribe();

        bus.publish(AppEvent::AnalysisStarted {
            session_id: "s1".to_string(),
        });

        match receiver.recv().await {
            Ok(AppEvent::AnalysisStarted { session_id }) => {
                assert_eq!(session_id, "s1");
            }
            _ => panic!("未收到预期事件"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(100);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(AppEvent::StateChanged {
            session_id: "s1".to_string(),
            from: StateKind::Onboarding,
            to: StateKind::Input,
            generation: 0,
            timestamp: Utc::now(),
        });

        assert!(receiver1.try_recv().is_ok());
        assert!(receiver2.try_recv().is_ok());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(AppEvent::Notice {
            message: "nobody listening".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
