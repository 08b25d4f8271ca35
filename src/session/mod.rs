//! 会话状态机
//!
//! 界面只有一个当前状态，所有切换都经过纯函数 [`transition`]：
//! 输入 (状态, 事件, 是否可提交)，输出 (新状态, 副作用列表)。
//! 副作用以数据形式返回，由会话 Actor 执行（发起分析、调度定时器等）。

pub mod timers;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::capture::{CaptureError, ContentCapture, ImageAttachment, UserContent};
use crate::llm::AnalysisResult;

/// 状态种类（不带数据，用于展示和事件）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StateKind {
    Onboarding,
    Input,
    Analyzing,
    TeaseResult,
    PaywallPrompt,
    Dashboard,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Onboarding => "Onboarding",
            StateKind::Input => "Input",
            StateKind::Analyzing => "Analyzing",
            StateKind::TeaseResult => "TeaseResult",
            StateKind::PaywallPrompt => "PaywallPrompt",
            StateKind::Dashboard => "Dashboard",
        };
        f.write_str(name)
    }
}

/// 模拟支付的临时标记，只存在于 PaywallPrompt 中
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSimulationState {
    pub payment_modal_open: bool,
    pub payment_succeeded: bool,
    /// 模拟的指纹确认进行中
    pub processing: bool,
}

/// 会话状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SessionState {
    Onboarding,
    Input {
        /// 上一次分析失败的提示
        notice: Option<String>,
    },
    Analyzing,
    TeaseResult {
        result: Arc<AnalysisResult>,
    },
    PaywallPrompt {
        result: Arc<AnalysisResult>,
        payment: PaymentSimulationState,
    },
    Dashboard {
        result: Arc<AnalysisResult>,
    },
}

impl SessionState {
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Onboarding => StateKind::Onboarding,
            SessionState::Input { .. } => StateKind::Input,
            SessionState::Analyzing => StateKind::Analyzing,
            SessionState::TeaseResult { .. } => StateKind::TeaseResult,
            SessionState::PaywallPrompt { .. } => StateKind::PaywallPrompt,
            SessionState::Dashboard { .. } => StateKind::Dashboard,
        }
    }

    pub fn result(&self) -> Option<&Arc<AnalysisResult>> {
        match self {
            SessionState::TeaseResult { result }
            | SessionState::PaywallPrompt { result, .. }
            | SessionState::Dashboard { result } => Some(result),
            _ => None,
        }
    }

    /// 非 PaywallPrompt 状态下所有标记均为 false
    pub fn payment(&self) -> PaymentSimulationState {
        match self {
            SessionState::PaywallPrompt { payment, .. } => *payment,
            _ => PaymentSimulationState::default(),
        }
    }

    pub fn notice(&self) -> Option<&str> {
        match self {
            SessionState::Input { notice } => notice.as_deref(),
            _ => None,
        }
    }

    fn input() -> Self {
        SessionState::Input { notice: None }
    }
}

/// 驱动状态机的事件（用户意图或异步完成）
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SkipOnboarding,
    OnboardingFinished,
    Submit,
    AnalysisSucceeded(Arc<AnalysisResult>),
    AnalysisFailed { notice: String },
    ViewFullReport,
    OpenPaymentModal,
    ClosePaymentModal,
    ConfirmPayment,
    PaymentCompleted,
    RevealElapsed,
    DeclinePayment,
    StartNewSession,
    Reset,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SkipOnboarding => "SkipOnboarding",
            SessionEvent::OnboardingFinished => "OnboardingFinished",
            SessionEvent::Submit => "Submit",
            SessionEvent::AnalysisSucceeded(_) => "AnalysisSucceeded",
            SessionEvent::AnalysisFailed { .. } => "AnalysisFailed",
            SessionEvent::ViewFullReport => "ViewFullReport",
            SessionEvent::OpenPaymentModal => "OpenPaymentModal",
            SessionEvent::ClosePaymentModal => "ClosePaymentModal",
            SessionEvent::ConfirmPayment => "ConfirmPayment",
            SessionEvent::PaymentCompleted => "PaymentCompleted",
            SessionEvent::RevealElapsed => "RevealElapsed",
            SessionEvent::DeclinePayment => "DeclinePayment",
            SessionEvent::StartNewSession => "StartNewSession",
            SessionEvent::Reset => "Reset",
        }
    }
}

/// 状态切换产生的副作用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// 发起一次分析调用（只在进入 Analyzing 时产生）
    BeginAnalysis,
    /// 向用户展示提示
    Notify(String),
    /// 支付成功的一次性音效/动画
    PlaySuccessCue,
    /// 模拟支付确认耗时后投递 PaymentCompleted
    SchedulePaymentProcessing,
    /// 揭晓延迟后投递 RevealElapsed
    ScheduleReveal,
    /// 清空用户内容与评判结果
    ClearContent,
    /// 作废所有挂起的定时器和分析调用
    CancelPending,
}

/// 状态切换结果
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: SessionState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(next: SessionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

/// 状态切换错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("状态 {state} 不接受事件 {event}")]
    InvalidTransition {
        state: StateKind,
        event: &'static str,
    },
    #[error("没有可提交的内容")]
    NotSubmittable,
}

/// 纯状态切换函数
pub fn transition(
    state: &SessionState,
    event: SessionEvent,
    submittable: bool,
) -> Result<Transition, TransitionError> {
    use SessionEvent as E;
    use SessionState as S;

    let invalid = |event: &SessionEvent| TransitionError::InvalidTransition {
        state: state.kind(),
        event: event.name(),
    };

    // 任意状态都可以放弃当前会话
    if let E::Reset = event {
        return Ok(Transition::with(
            S::input(),
            vec![Effect::CancelPending, Effect::ClearContent],
        ));
    }

    match (state, event) {
        (S::Onboarding, E::OnboardingFinished) => Ok(Transition::to(S::input())),
        // 跳过时打断仍在进行的开场动画
        (S::Onboarding, E::SkipOnboarding) => {
            Ok(Transition::with(S::input(), vec![Effect::CancelPending]))
        }

        (S::Input { .. }, E::Submit) => {
            if !submittable {
                return Err(TransitionError::NotSubmittable);
            }
            Ok(Transition::with(S::Analyzing, vec![Effect::BeginAnalysis]))
        }

        (S::Analyzing, E::AnalysisSucceeded(result)) => {
            Ok(Transition::to(S::TeaseResult { result }))
        }
        (S::Analyzing, E::AnalysisFailed { notice }) => Ok(Transition::with(
            S::Input {
                notice: Some(notice.clone()),
            },
            vec![Effect::Notify(notice)],
        )),

        (S::TeaseResult { result }, E::ViewFullReport) => Ok(Transition::to(S::PaywallPrompt {
            result: result.clone(),
            payment: PaymentSimulationState::default(),
        })),

        (S::PaywallPrompt { result, payment }, event) => {
            paywall_transition(result, *payment, event, state.kind())
        }

        (S::Dashboard { .. }, E::StartNewSession) => Ok(Transition::with(
            S::input(),
            vec![Effect::CancelPending, Effect::ClearContent],
        )),

        (_, event) => Err(invalid(&event)),
    }
}

fn paywall_transition(
    result: &Arc<AnalysisResult>,
    payment: PaymentSimulationState,
    event: SessionEvent,
    kind: StateKind,
) -> Result<Transition, TransitionError> {
    use SessionEvent as E;

    let paywall = |payment: PaymentSimulationState| SessionState::PaywallPrompt {
        result: result.clone(),
        payment,
    };
    let invalid = |event: &SessionEvent| TransitionError::InvalidTransition {
        state: kind,
        event: event.name(),
    };

    // 支付成功后只等待揭晓
    if payment.payment_succeeded {
        return match event {
            E::RevealElapsed => Ok(Transition::to(SessionState::Dashboard {
                result: result.clone(),
            })),
            other => Err(invalid(&other)),
        };
    }

    match event {
        E::OpenPaymentModal => Ok(Transition::to(paywall(PaymentSimulationState {
            payment_modal_open: true,
            ..payment
        }))),
        E::ClosePaymentModal if !payment.processing => {
            Ok(Transition::to(paywall(PaymentSimulationState {
                payment_modal_open: false,
                ..payment
            })))
        }
        E::ConfirmPayment if !payment.processing => Ok(Transition::with(
            paywall(PaymentSimulationState {
                payment_modal_open: true,
                processing: true,
                ..payment
            }),
            vec![Effect::SchedulePaymentProcessing],
        )),
        E::PaymentCompleted => Ok(Transition::with(
            paywall(PaymentSimulationState {
                payment_modal_open: false,
                payment_succeeded: true,
                processing: false,
            }),
            vec![Effect::PlaySuccessCue, Effect::ScheduleReveal],
        )),
        E::DeclinePayment => Ok(Transition::with(
            SessionState::TeaseResult {
                result: result.clone(),
            },
            // 放弃支付时作废可能挂起的确认
            vec![Effect::CancelPending],
        )),
        other => Err(invalid(&other)),
    }
}

/// 会话：当前状态 + 用户内容 + 代数
///
/// 代数在每次 `CancelPending` 时递增，挂起任务携带调度时的代数，
/// 投递时代数不一致即被丢弃。
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    capture: ContentCapture,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Onboarding,
            capture: ContentCapture::new(),
            generation: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn content(&self) -> &UserContent {
        self.capture.content()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// 应用事件；ClearContent 与代数递增在这里完成，其余副作用返回给调用方
    pub fn apply(&mut self, event: SessionEvent) -> Result<Vec<Effect>, TransitionError> {
        let Transition { next, effects } =
            transition(&self.state, event, self.capture.is_submittable())?;

        for effect in &effects {
            match effect {
                Effect::CancelPending => self.generation += 1,
                Effect::ClearContent => self.capture.clear(),
                _ => {}
            }
        }

        self.state = next;
        Ok(effects)
    }

    fn ensure_editable(&self) -> Result<(), CaptureError> {
        match self.state.kind() {
            StateKind::Input => Ok(()),
            other => Err(CaptureError::Locked(other)),
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), CaptureError> {
        self.ensure_editable()?;
        self.capture.set_text(text);
        Ok(())
    }

    pub fn set_image(&mut self, image: ImageAttachment) -> Result<(), CaptureError> {
        self.ensure_editable()?;
        self.capture.attach(image);
        Ok(())
    }

    pub fn remove_image(&mut self) -> Result<(), CaptureError> {
        self.ensure_editable()?;
        self.capture.remove_image();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scenario_result;

    fn result() -> Arc<AnalysisResult> {
        Arc::new(scenario_result())
    }

    fn session_in_input(text: &str) -> Session {
        let mut session = Session::new();
        session.apply(SessionEvent::SkipOnboarding).unwrap();
        session.set_text(text).unwrap();
        session
    }

    fn session_in_paywall() -> Session {
        let mut session = session_in_input("hello world");
        session.apply(SessionEvent::Submit).unwrap();
        session
            .apply(SessionEvent::AnalysisSucceeded(result()))
            .unwrap();
        session.apply(SessionEvent::ViewFullReport).unwrap();
        session
    }

    #[test]
    fn test_initial_state_is_onboarding() {
        let session = Session::new();
        assert_eq!(session.state().kind(), StateKind::Onboarding);
        assert_eq!(session.generation(), 0);
    }

    #[test]
    fn test_onboarding_exits_to_input() {
        let next = transition(&SessionState::Onboarding, SessionEvent::OnboardingFinished, false)
            .unwrap();
        assert_eq!(next.next, SessionState::Input { notice: None });
        assert!(next.effects.is_empty());

        let skipped =
            transition(&SessionState::Onboarding, SessionEvent::SkipOnboarding, false).unwrap();
        assert_eq!(skipped.next.kind(), StateKind::Input);
    }

    #[test]
    fn test_submit_requires_content() {
        let mut session = Session::new();
        session.apply(SessionEvent::SkipOnboarding).unwrap();

        assert_eq!(
            session.apply(SessionEvent::Submit),
            Err(TransitionError::NotSubmittable)
        );
        assert_eq!(session.state().kind(), StateKind::Input);
    }

    #[test]
    fn test_submit_begins_analysis() {
        let mut session = session_in_input("hello world");
        let effects = session.apply(SessionEvent::Submit).unwrap();
        assert_eq!(effects, vec![Effect::BeginAnalysis]);
        assert_eq!(session.state().kind(), StateKind::Analyzing);
    }

    #[test]
    fn test_image_only_is_submittable() {
        let mut session = Session::new();
        session.apply(SessionEvent::SkipOnboarding).unwrap();
        session
            .set_image(ImageAttachment::new(vec![1, 2, 3], "image/png"))
            .unwrap();
        assert!(session.apply(SessionEvent::Submit).is_ok());
    }

    #[test]
    fn test_scenario_a_result_is_stored() {
        let mut session = session_in_input("hello world");
        session.apply(SessionEvent::Submit).unwrap();
        session
            .apply(SessionEvent::AnalysisSucceeded(result()))
            .unwrap();

        match session.state() {
            SessionState::TeaseResult { result } => assert_eq!(**result, scenario_result()),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_failure_bounces_to_input_with_content() {
        let mut session = session_in_input("my brilliant post");
        session.apply(SessionEvent::Submit).unwrap();
        let effects = session
            .apply(SessionEvent::AnalysisFailed {
                notice: "i crashed".to_string(),
            })
            .unwrap();

        assert_eq!(effects, vec![Effect::Notify("i crashed".to_string())]);
        assert_eq!(session.state().notice(), Some("i crashed"));
        assert_eq!(session.content().text, "my brilliant post");
    }

    #[test]
    fn test_content_locked_outside_input() {
        let mut session = session_in_input("hello");
        session.apply(SessionEvent::Submit).unwrap();

        assert!(matches!(
            session.set_text("edited"),
            Err(CaptureError::Locked(StateKind::Analyzing))
        ));
        assert_eq!(session.content().text, "hello");
    }

    #[test]
    fn test_scenario_b_decline_keeps_result() {
        let mut session = session_in_paywall();
        assert_eq!(session.state().kind(), StateKind::PaywallPrompt);

        session.apply(SessionEvent::DeclinePayment).unwrap();
        match session.state() {
            SessionState::TeaseResult { result } => assert_eq!(**result, scenario_result()),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_scenario_c_payment_is_two_phase() {
        let mut session = session_in_paywall();
        session.apply(SessionEvent::OpenPaymentModal).unwrap();
        assert!(session.state().payment().payment_modal_open);

        let effects = session.apply(SessionEvent::ConfirmPayment).unwrap();
        assert_eq!(effects, vec![Effect::SchedulePaymentProcessing]);
        assert!(session.state().payment().processing);

        let effects = session.apply(SessionEvent::PaymentCompleted).unwrap();
        assert_eq!(effects, vec![Effect::PlaySuccessCue, Effect::ScheduleReveal]);
        let payment = session.state().payment();
        assert!(payment.payment_succeeded);
        assert!(!payment.payment_modal_open);
        assert_eq!(session.state().kind(), StateKind::PaywallPrompt);

        session.apply(SessionEvent::RevealElapsed).unwrap();
        assert_eq!(session.state().kind(), StateKind::Dashboard);
        assert!(!session.state().payment().payment_succeeded);
    }

    #[test]
    fn test_cannot_decline_after_success() {
        let mut session = session_in_paywall();
        session.apply(SessionEvent::PaymentCompleted).unwrap();
        assert!(matches!(
            session.apply(SessionEvent::DeclinePayment),
            Err(TransitionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reveal_requires_success() {
        let mut session = session_in_paywall();
        assert!(session.apply(SessionEvent::RevealElapsed).is_err());
        assert_eq!(session.state().kind(), StateKind::PaywallPrompt);
    }

    #[test]
    fn test_scenario_d_new_session_clears_everything() {
        let mut session = session_in_paywall();
        session.apply(SessionEvent::PaymentCompleted).unwrap();
        session.apply(SessionEvent::RevealElapsed).unwrap();
        let generation = session.generation();

        let effects = session.apply(SessionEvent::StartNewSession).unwrap();
        assert!(effects.contains(&Effect::ClearContent));
        assert_eq!(session.state(), &SessionState::Input { notice: None });
        assert!(session.state().result().is_none());
        assert_eq!(session.content(), &UserContent::default());
        assert_eq!(session.generation(), generation + 1);
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut session = session_in_paywall();
        session.apply(SessionEvent::PaymentCompleted).unwrap();

        session.apply(SessionEvent::Reset).unwrap();
        assert_eq!(session.state().kind(), StateKind::Input);
        assert!(!session.state().payment().payment_succeeded);
        assert!(!session.capture.is_submittable());
    }

    #[test]
    fn test_invalid_events_leave_state_unchanged() {
        let mut session = Session::new();
        for event in [
            SessionEvent::Submit,
            SessionEvent::ViewFullReport,
            SessionEvent::PaymentCompleted,
            SessionEvent::StartNewSession,
        ] {
            assert!(session.apply(event).is_err());
            assert_eq!(session.state().kind(), StateKind::Onboarding);
        }

        let mut session = session_in_input("hi");
        let err = session
            .apply(SessionEvent::AnalysisSucceeded(result()))
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                state: StateKind::Input,
                event: "AnalysisSucceeded",
            }
        );
    }

    #[test]
    fn test_result_present_exactly_in_result_states() {
        let r = result();
        let states = [
            SessionState::Onboarding,
            SessionState::Input { notice: None },
            SessionState::Analyzing,
            SessionState::TeaseResult { result: r.clone() },
            SessionState::PaywallPrompt {
                result: r.clone(),
                payment: PaymentSimulationState::default(),
            },
            SessionState::Dashboard { result: r },
        ];

        for state in &states {
            let expects_result = matches!(
                state.kind(),
                StateKind::TeaseResult | StateKind::PaywallPrompt | StateKind::Dashboard
            );
            assert_eq!(state.result().is_some(), expects_result);
        }
    }
}
