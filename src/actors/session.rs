// Session Actor - 使用Actor模式管理会话状态
//
// 会话状态只由这个任务持有，所有修改都经过消息；
// 分析调用和定时器在独立任务中运行，完成后把结果投递回来，
// 投递时携带调度时的会话代数，过期消息直接丢弃。

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, ContentPreview, ImageAttachment, UserContent};
use crate::event_bus::{AppEvent, EventBus};
use crate::llm::{AnalysisClient, AnalysisError, AnalysisResult};
use crate::models::TimingConfig;
use crate::session::timers::{PendingTasks, TaskKind};
use crate::session::{Effect, Session, SessionEvent, SessionState, StateKind, TransitionError};
use crate::typewriter::Typewriter;

/// 分析失败时展示给用户的提示
pub const ANALYSIS_FAILURE_NOTICE: &str =
    "i crashed. probably because your post was too bad. try again.";

/// 会话错误
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("会话 Actor 已停止")]
    ActorStopped,
}

/// 给渲染层的会话快照
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub generation: u64,
    pub kind: StateKind,
    pub state: SessionState,
    pub content: ContentPreview,
}

/// 会话命令
pub enum SessionCommand {
    /// 用户意图
    Dispatch {
        event: SessionEvent,
        reply: oneshot::Sender<Result<StateKind, TransitionError>>,
    },

    /// 修改文本
    SetText {
        text: String,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },

    /// 附加图片（替换已有图片）
    SetImage {
        image: ImageAttachment,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },

    /// 移除图片
    RemoveImage {
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },

    /// 播放开场白，结束后自动进入 Input
    StartOnboarding,

    /// 获取快照
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },

    /// 获取导出所需的结果与内容（只在 Dashboard 中可用）
    ExportContext {
        reply: oneshot::Sender<Option<(Arc<AnalysisResult>, UserContent)>>,
    },

    /// 替换节奏配置和/或分析客户端，下次使用时生效
    Reconfigure {
        timing: Option<TimingConfig>,
        client: Option<Arc<AnalysisClient>>,
    },

    /// 分析调用结束（内部）
    AnalysisFinished {
        generation: u64,
        outcome: Result<AnalysisResult, AnalysisError>,
    },

    /// 定时器到期（内部）
    TimerFired { generation: u64, event: SessionEvent },

    /// 健康检查（Ping）
    HealthCheck { reply: oneshot::Sender<()> },
}

/// Session Actor
pub struct SessionActor {
    receiver: mpsc::Receiver<SessionCommand>,
    /// 弱引用，避免 Actor 自己让通道永不关闭
    self_sender: mpsc::WeakSender<SessionCommand>,
    session: Session,
    client: Arc<AnalysisClient>,
    event_bus: Arc<EventBus>,
    timing: TimingConfig,
    pending: PendingTasks,
}

impl SessionActor {
    /// 创建新的Actor
    pub fn new(
        client: Arc<AnalysisClient>,
        event_bus: Arc<EventBus>,
        timing: TimingConfig,
    ) -> (Self, SessionHandle) {
        let (sender, receiver) = mpsc::channel(64);
        let actor = Self {
            receiver,
            self_sender: sender.downgrade(),
            session: Session::new(),
            client,
            event_bus,
            timing,
            pending: PendingTasks::new(),
        };
        let handle = SessionHandle { sender };
        (actor, handle)
    }

    /// 运行Actor（在单独的任务中运行）
    pub async fn run(mut self) {
        info!("Session Actor 已启动: {}", self.session.id());

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        let cancelled = self.pending.cancel_all();
        info!("Session Actor 已停止，中止 {} 个挂起任务", cancelled);
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Dispatch { event, reply } => {
                let result = self.apply_event(event);
                let _ = reply.send(result);
            }

            SessionCommand::SetText { text, reply } => {
                let _ = reply.send(self.session.set_text(text));
            }

            SessionCommand::SetImage { image, reply } => {
                let _ = reply.send(self.session.set_image(image));
            }

            SessionCommand::RemoveImage { reply } => {
                let _ = reply.send(self.session.remove_image());
            }

            SessionCommand::StartOnboarding => self.start_onboarding(),

            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }

            SessionCommand::ExportContext { reply } => {
                let context = match self.session.state() {
                    SessionState::Dashboard { result } => {
                        Some((result.clone(), self.session.content().clone()))
                    }
                    _ => None,
                };
                let _ = reply.send(context);
            }

            SessionCommand::Reconfigure { timing, client } => {
                if let Some(timing) = timing {
                    self.timing = timing;
                }
                if let Some(client) = client {
                    info!("分析客户端已切换为 {}", client.provider_name());
                    self.client = client;
                }
            }

            SessionCommand::AnalysisFinished {
                generation,
                outcome,
            } => self.on_analysis_finished(generation, outcome),

            SessionCommand::TimerFired { generation, event } => {
                if !self.session.is_current(generation) {
                    debug!("丢弃过期定时器 {} (代数 {})", event.name(), generation);
                    return;
                }
                if let Err(e) = self.apply_event(event) {
                    warn!("定时器事件被拒绝: {}", e);
                }
            }

            SessionCommand::HealthCheck { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session.id().to_string(),
            generation: self.session.generation(),
            kind: self.session.state().kind(),
            state: self.session.state().clone(),
            content: self.session.content().preview(),
        }
    }

    /// 应用事件并执行副作用
    fn apply_event(&mut self, event: SessionEvent) -> Result<StateKind, TransitionError> {
        let from = self.session.state().kind();
        let event_name = event.name();

        let effects = self.session.apply(event).map_err(|e| {
            debug!("事件 {} 被拒绝: {}", event_name, e);
            e
        })?;

        let to = self.session.state().kind();
        if from != to {
            info!("会话状态: {} -> {} ({})", from, to, event_name);
        }
        self.event_bus.publish(AppEvent::StateChanged {
            session_id: self.session.id().to_string(),
            from,
            to,
            generation: self.session.generation(),
            timestamp: Utc::now(),
        });

        for effect in effects {
            self.run_effect(effect);
        }

        Ok(to)
    }

    fn run_effect(&mut self, effect: Effect) {
        let generation = self.session.generation();

        match effect {
            Effect::BeginAnalysis => self.begin_analysis(),

            Effect::Notify(message) => {
                self.event_bus.publish(AppEvent::Notice { message });
            }

            Effect::PlaySuccessCue => {
                self.event_bus.publish(AppEvent::PaymentSucceeded {
                    session_id: self.session.id().to_string(),
                });
            }

            Effect::SchedulePaymentProcessing => {
                if let Some(sender) = self.self_sender.upgrade() {
                    self.pending.schedule(
                        TaskKind::PaymentProcessing,
                        self.timing.payment_processing(),
                        sender,
                        SessionCommand::TimerFired {
                            generation,
                            event: SessionEvent::PaymentCompleted,
                        },
                    );
                }
            }

            Effect::ScheduleReveal => {
                if let Some(sender) = self.self_sender.upgrade() {
                    self.pending.schedule(
                        TaskKind::Reveal,
                        self.timing.reveal_delay(),
                        sender,
                        SessionCommand::TimerFired {
                            generation,
                            event: SessionEvent::RevealElapsed,
                        },
                    );
                }
            }

            // 内容已在 Session::apply 中清空
            Effect::ClearContent => {}

            Effect::CancelPending => {
                let cancelled = self.pending.cancel_all();
                if cancelled > 0 {
                    info!("会话被取代，中止 {} 个挂起任务", cancelled);
                }
            }
        }
    }

    /// 发起分析；结果至少在 analyzing_floor 之后才投递
    fn begin_analysis(&mut self) {
        let Some(sender) = self.self_sender.upgrade() else {
            return;
        };

        let generation = self.session.generation();
        let content = self.session.content().clone();
        let client = self.client.clone();
        let floor = self.timing.analyzing_floor();

        self.event_bus.publish(AppEvent::AnalysisStarted {
            session_id: self.session.id().to_string(),
        });

        self.pending.spawn(TaskKind::Analysis, async move {
            let (outcome, _) = tokio::join!(client.analyze(&content), tokio::time::sleep(floor));
            let _ = sender
                .send(SessionCommand::AnalysisFinished {
                    generation,
                    outcome,
                })
                .await;
        });
    }

    fn on_analysis_finished(
        &mut self,
        generation: u64,
        outcome: Result<AnalysisResult, AnalysisError>,
    ) {
        if !self.session.is_current(generation) {
            debug!("丢弃过期分析结果 (代数 {})", generation);
            return;
        }

        let session_id = self.session.id().to_string();
        let event = match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                self.event_bus.publish(AppEvent::AnalysisCompleted {
                    session_id,
                    result: result.clone(),
                });
                SessionEvent::AnalysisSucceeded(result)
            }
            Err(e) => {
                error!("分析失败，返回输入页: {}", e);
                self.event_bus.publish(AppEvent::AnalysisFailed {
                    session_id,
                    error: e.to_string(),
                });
                SessionEvent::AnalysisFailed {
                    notice: ANALYSIS_FAILURE_NOTICE.to_string(),
                }
            }
        };

        if let Err(e) = self.apply_event(event) {
            warn!("分析结果无法应用: {}", e);
        }
    }

    /// 播放开场白；被跳过时任务随 CancelPending 一起中止
    fn start_onboarding(&mut self) {
        if self.session.state().kind() != StateKind::Onboarding
            || self.pending.is_pending(TaskKind::Typewriter)
        {
            return;
        }
        let Some(sender) = self.self_sender.upgrade() else {
            return;
        };

        let generation = self.session.generation();
        let typewriter = Typewriter::onboarding(
            self.timing.typewriter_char(),
            self.timing.typewriter_line_delay(),
        );
        let tail = self.timing.onboarding_tail();
        let event_bus = self.event_bus.clone();

        self.pending.spawn(TaskKind::Typewriter, async move {
            typewriter
                .play(|frame| event_bus.publish(AppEvent::Typewriter(frame)))
                .await;
            tokio::time::sleep(tail).await;
            let _ = sender
                .send(SessionCommand::TimerFired {
                    generation,
                    event: SessionEvent::OnboardingFinished,
                })
                .await;
        });
    }
}

/// Session Handle（用于与Actor通信，可克隆）
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| SessionError::ActorStopped)?;
        rx.await.map_err(|_| SessionError::ActorStopped)
    }

    async fn dispatch(&self, event: SessionEvent) -> Result<StateKind, SessionError> {
        Ok(self
            .request(|reply| SessionCommand::Dispatch { event, reply })
            .await??)
    }

    /// 播放开场白
    pub async fn start_onboarding(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::StartOnboarding)
            .await
            .map_err(|_| SessionError::ActorStopped)
    }

    pub async fn skip_onboarding(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::SkipOnboarding).await
    }

    pub async fn set_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        Ok(self
            .request(|reply| SessionCommand::SetText { text, reply })
            .await??)
    }

    pub async fn set_image(&self, image: ImageAttachment) -> Result<(), SessionError> {
        Ok(self
            .request(|reply| SessionCommand::SetImage { image, reply })
            .await??)
    }

    pub async fn remove_image(&self) -> Result<(), SessionError> {
        Ok(self
            .request(|reply| SessionCommand::RemoveImage { reply })
            .await??)
    }

    /// 提交分析
    pub async fn submit(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::Submit).await
    }

    pub async fn view_full_report(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::ViewFullReport).await
    }

    pub async fn open_payment_modal(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::OpenPaymentModal).await
    }

    pub async fn close_payment_modal(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::ClosePaymentModal).await
    }

    /// 确认支付（模拟确认耗时后进入成功阶段）
    pub async fn confirm_payment(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::ConfirmPayment).await
    }

    pub async fn decline_payment(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::DeclinePayment).await
    }

    pub async fn start_new_session(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::StartNewSession).await
    }

    /// 放弃当前会话（任意状态）
    pub async fn reset(&self) -> Result<StateKind, SessionError> {
        self.dispatch(SessionEvent::Reset).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn export_context(
        &self,
    ) -> Result<Option<(Arc<AnalysisResult>, UserContent)>, SessionError> {
        self.request(|reply| SessionCommand::ExportContext { reply })
            .await
    }

    pub async fn reconfigure(
        &self,
        timing: Option<TimingConfig>,
        client: Option<Arc<AnalysisClient>>,
    ) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Reconfigure { timing, client })
            .await
            .map_err(|_| SessionError::ActorStopped)
    }

    /// 健康检查
    /// 返回true表示Actor正常运行，false表示Actor无响应或已停止
    /// 超时时间为5秒
    pub async fn health_check(&self) -> bool {
        let (reply, rx) = oneshot::channel();

        if self
            .sender
            .send(SessionCommand::HealthCheck { reply })
            .await
            .is_err()
        {
            warn!("Session Actor 健康检查失败: 通道已关闭");
            return false;
        }

        match tokio::time::timeout(std::time::Duration::from_secs(5), rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("Session Actor 健康检查失败: Actor已停止");
                false
            }
            Err(_) => {
                warn!("Session Actor 健康检查失败: 超时(5秒)");
                false
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn inject(&self, cmd: SessionCommand) {
        let _ = self.sender.send(cmd).await;
    }
}
