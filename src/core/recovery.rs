//! 错误恢复引擎
//!
//! 根据 LoopError 类型与已重试次数返回 RecoveryAction，供调试循环决定是重试、带说明重问、继续还是终止。
//! 可重试的错误最多重试一次：第二次出现即为致命。

use crate::core::{LoopError, OracleError, RecoveryAction, SessionError};

/// 每类可重试错误允许的重试次数
pub const MAX_RETRIES: u8 = 1;

/// 解析失败后追加到下一次提示末尾的说明
pub const CLARIFICATION_NOTE: &str = "Your previous reply could not be parsed. \
Reply with exactly one line: either a single debugger command (optionally prefixed with `CMD:`), \
`task_complete` when you can answer the task, or `task_error` if you cannot proceed. \
Do not add explanations or markdown.";

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// `retries` 为本步内该错误已经重试过的次数
    pub fn handle(&self, err: &LoopError, retries: u8) -> RecoveryAction {
        let exhausted = retries >= MAX_RETRIES;
        match err {
            LoopError::ContextProbe(_) => RecoveryAction::Continue,
            LoopError::Session(SessionError::Timeout { .. }) if !exhausted => RecoveryAction::Retry,
            LoopError::Oracle(OracleError::Parse(_)) if !exhausted => {
                RecoveryAction::RetryWithPrompt(CLARIFICATION_NOTE.to_string())
            }
            LoopError::Oracle(
                OracleError::Timeout(_)
                | OracleError::Http(_)
                | OracleError::Transport(_)
                | OracleError::MalformedBody(_),
            ) if !exhausted => RecoveryAction::Retry,
            _ => RecoveryAction::Abort,
        }
    }
}
