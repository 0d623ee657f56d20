//! 会话监管：外部取消信号
//!
//! 持有 CancellationToken；调试循环在每轮 RUNNING 开始时检查，用户 Ctrl+C 时取消即可让循环以 FAILED 退出并回收子进程。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 触发取消（用户 Ctrl+C）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 安装 Ctrl+C 处理：收到信号即取消
    pub fn install_ctrl_c(&self) {
        let token = self.cancel_token.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, cancelling debug chain...");
                token.cancel();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_with_clones() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.cancel_token();
        assert!(!supervisor.is_cancelled());
        supervisor.clone().cancel();
        assert!(token.is_cancelled());
        assert!(supervisor.is_cancelled());
    }
}
