// 挂起任务管理 - 延迟切换、打字机动画和分析调用
//
// 所有任务都记录 JoinHandle，会话被取代时统一中止；
// 已经进入通道的消息由会话代数过滤。

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// 挂起任务种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Analysis,
    PaymentProcessing,
    Reveal,
    Typewriter,
}

/// 挂起任务表
#[derive(Default)]
pub struct PendingTasks {
    tasks: Vec<(TaskKind, JoinHandle<()>)>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 延迟 `delay` 后把 `message` 投递到 `sender`
    pub fn schedule<T>(&mut self, kind: TaskKind, delay: Duration, sender: mpsc::Sender<T>, message: T)
    where
        T: Send + 'static,
    {
        trace!("调度 {:?}，延迟 {:?}", kind, delay);
        self.spawn(kind, async move {
            tokio::time::sleep(delay).await;
            if sender.send(message).await.is_err() {
                debug!("{:?} 到期时会话已关闭", kind);
            }
        });
    }

    /// 启动并跟踪任意任务
    pub fn spawn<F>(&mut self, kind: TaskKind, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.prune();
        self.tasks.push((kind, tokio::spawn(future)));
    }

    /// 中止所有挂起任务，返回中止数量
    pub fn cancel_all(&mut self) -> usize {
        self.prune();
        let count = self.tasks.len();
        for (kind, handle) in self.tasks.drain(..) {
            trace!("中止 {:?}", kind);
            handle.abort();
        }
        count
    }

    /// 指定种类的任务是否仍在运行
    pub fn is_pending(&self, kind: TaskKind) -> bool {
        self.tasks
            .iter()
            .any(|(k, handle)| *k == kind && !handle.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&mut self) {
        self.tasks.retain(|(_, handle)| !handle.is_finished());
    }
}

impl Drop for PendingTasks {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_message_is_delivered() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut tasks = PendingTasks::new();

        tasks.schedule(TaskKind::Reveal, Duration::from_millis(2000), tx, 7u32);
        assert!(tasks.is_pending(TaskKind::Reveal));

        assert_eq!(rx.recv().await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_message_never_arrives() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut tasks = PendingTasks::new();

        tasks.schedule(TaskKind::Reveal, Duration::from_millis(2000), tx.clone(), 1u32);
        tasks.schedule(TaskKind::PaymentProcessing, Duration::from_millis(1500), tx, 2u32);
        assert_eq!(tasks.cancel_all(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(tasks.is_empty());
    }
}
