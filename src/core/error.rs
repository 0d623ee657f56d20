//! 错误类型与恢复动作
//!
//! 会话层（SessionError）与 Oracle 层（OracleError）各自独立，由 LoopError 汇总；
//! 每个错误映射到稳定的 ErrorKind，供 RecoveryEngine 决策与 FailureReport 序列化。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 调试器子进程相关错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 可执行文件或目标缺失、或进程启动即退出
    #[error("failed to launch debugger: {0}")]
    Launch(String),

    /// 向已退出的子进程发送命令
    #[error("debugger session is no longer alive")]
    Dead,

    /// 超时内未出现提示符边界；partial 为已收到的部分输出
    #[error("no prompt boundary within {timeout_ms}ms")]
    Timeout { timeout_ms: u64, partial: String },

    #[error("session I/O error: {0}")]
    Io(String),
}

/// 决策 Oracle 相关错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle request timed out after {0}s")]
    Timeout(u64),

    /// 端点返回非成功响应
    #[error("oracle returned an error response: {0}")]
    Http(String),

    /// 网络层失败（连接、TLS 等）
    #[error("oracle transport failure: {0}")]
    Transport(String),

    /// 响应体无法解析或缺少内容
    #[error("malformed oracle response: {0}")]
    MalformedBody(String),

    /// 回复无法映射为合法 Action
    #[error("could not parse oracle reply: {0}")]
    Parse(String),
}

/// 调试循环的致命或可恢复错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// 上下文探针输出缺失或不是合法 JSON（可恢复）
    #[error("context probe output unusable: {0}")]
    ContextProbe(String),

    #[error("step budget exhausted")]
    StepBudgetExhausted,

    #[error("cancelled")]
    Cancelled,

    /// Oracle 显式放弃任务
    #[error("oracle gave up on the task")]
    OracleGaveUp,
}

/// 稳定的错误种类（对外报告用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LaunchError,
    SessionDeadError,
    TimeoutError,
    SessionIoError,
    OracleTimeoutError,
    OracleHttpError,
    OracleParseError,
    ContextProbeError,
    StepBudgetExhausted,
    Cancelled,
    OracleGaveUp,
}

impl LoopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoopError::Session(SessionError::Launch(_)) => ErrorKind::LaunchError,
            LoopError::Session(SessionError::Dead) => ErrorKind::SessionDeadError,
            LoopError::Session(SessionError::Timeout { .. }) => ErrorKind::TimeoutError,
            LoopError::Session(SessionError::Io(_)) => ErrorKind::SessionIoError,
            LoopError::Oracle(OracleError::Timeout(_)) => ErrorKind::OracleTimeoutError,
            LoopError::Oracle(OracleError::Http(_))
            | LoopError::Oracle(OracleError::Transport(_))
            | LoopError::Oracle(OracleError::MalformedBody(_)) => ErrorKind::OracleHttpError,
            LoopError::Oracle(OracleError::Parse(_)) => ErrorKind::OracleParseError,
            LoopError::ContextProbe(_) => ErrorKind::ContextProbeError,
            LoopError::StepBudgetExhausted => ErrorKind::StepBudgetExhausted,
            LoopError::Cancelled => ErrorKind::Cancelled,
            LoopError::OracleGaveUp => ErrorKind::OracleGaveUp,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 原样重试（同一命令或同一提示）
    Retry,
    /// 在提示后追加说明再问一次 Oracle
    RetryWithPrompt(String),
    /// 记录后继续循环
    Continue,
    /// 转入 FAILED
    Abort,
}

/// 致命退出时交给调用方的结构化报告
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    /// 出错时所在的步号：STARTING 为 0，RUNNING 中为正在尝试的那一步
    pub step: usize,
    pub message: String,
    /// 最近一次捕获的原始输出
    pub last_output: String,
}

impl FailureReport {
    pub fn new(err: &LoopError, step: usize, last_output: impl Into<String>) -> Self {
        Self {
            kind: err.kind(),
            step,
            message: err.to_string(),
            last_output: last_output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err: LoopError = SessionError::Launch("missing".into()).into();
        assert_eq!(err.kind(), ErrorKind::LaunchError);
        let err: LoopError = OracleError::Parse("".into()).into();
        assert_eq!(err.kind(), ErrorKind::OracleParseError);
        let err: LoopError = OracleError::MalformedBody("no choices".into()).into();
        assert_eq!(err.kind(), ErrorKind::OracleHttpError);
        assert_eq!(LoopError::StepBudgetExhausted.kind(), ErrorKind::StepBudgetExhausted);
    }

    #[test]
    fn test_failure_report_serializes_kind() {
        let report = FailureReport::new(&LoopError::StepBudgetExhausted, 3, "(tail)");
        assert_eq!(report.message, "step budget exhausted");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "step_budget_exhausted");
        assert_eq!(json["step"], 3);
    }
}
