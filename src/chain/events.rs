//! 调试循环过程事件：用于 CLI 进度显示或前端流式展示

use serde::Serialize;

use crate::core::{ErrorKind, LoopPhase};

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// 状态机阶段迁移
    Phase { phase: LoopPhase },
    /// 即将询问 Oracle（当前已完成步数）
    StepUpdate { step: usize, max_steps: usize },
    /// 命令已派发
    Command { step: usize, command: String },
    /// 命令输出（预览，避免过长）
    Observation { step: usize, preview: String },
    /// 上下文转储不可用，循环继续
    ContextUnavailable { step: usize, reason: String },
    /// 错误恢复动作（Retry / RetryWithPrompt）
    Recovery { action: String, detail: String },
    /// 最终总结
    Summary { text: String },
    /// 进入 FAILED
    Failed { kind: ErrorKind, message: String },
}
