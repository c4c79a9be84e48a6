//! 优雅关闭
//!
//! Ctrl+C / SIGTERM / 输入流错误都汇总为一个 ShutdownReason，主循环退出后由
//! ShutdownCoordinator 带超时逐个执行清理，记忆数据在进程结束前落盘。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::memory::MemoryStore;

/// 触发关闭的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或输入结束
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 主循环无法继续（如标准输入读取失败）
    FatalError(String),
}

/// 关闭信号：取消令牌 + 原因广播
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(4);
        Self {
            token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 只有第一次触发会广播原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.reason_tx.send(reason);
        self.token.cancel();
    }

    /// 需在触发前订阅才能收到原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C，unix 下另外监听 SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    let manager = Arc::clone(self);
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            manager.shutdown(ShutdownReason::Signal);
                        }
                    });
                }
                Err(e) => tracing::warn!("SIGTERM handler unavailable: {}", e),
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 用于日志
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理；单个任务失败或超时不影响后续任务
pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.tasks.push(Box::new(task));
    }

    /// 返回成功完成的任务数
    pub async fn run_cleanup(&self, reason: &ShutdownReason) -> usize {
        tracing::info!("Shutting down ({:?}), running {} cleanup tasks", reason, self.tasks.len());
        let mut succeeded = 0;

        for task in &self.tasks {
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup '{}' done", task.name());
                    succeeded += 1;
                }
                Ok(Err(e)) => tracing::warn!("Cleanup '{}' failed: {}", task.name(), e),
                Err(_) => tracing::warn!(
                    "Cleanup '{}' timed out after {:?}",
                    task.name(),
                    self.timeout
                ),
            }
        }
        succeeded
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 退出前把记忆写入数据文件
pub struct StoreFlushCleanup {
    store: Arc<MemoryStore>,
}

impl StoreFlushCleanup {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for StoreFlushCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.store.shutdown().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MemoryStore"
    }
}
