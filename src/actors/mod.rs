// Actor模块 - 使用Actor模式管理会话状态
//
// 用消息传递替代Arc<Mutex<T>>，会话状态只有一个所有者
// 异步完成（分析、定时器）同样以消息形式回到 Actor

pub mod session;

pub use session::{
    SessionActor, SessionCommand, SessionError, SessionHandle, SessionSnapshot,
    ANALYSIS_FAILURE_NOTICE,
};
