//! 子进程会话层：把异步、行缓冲的调试器 I/O 封装为同步的 "发命令 → 等提示符 → 取输出" 契约
//!
//! - **boundary**: 提示符边界匹配（字面量 / 正则）与字节流切分
//! - **target**: 被调试目标描述
//! - **process**: 基于 tokio 子进程的调试器会话与启动器
//!
//! DebugSession / SessionLauncher 是调试循环依赖的接缝，测试中可用脚本化实现替换。

pub mod boundary;
pub mod process;
pub mod target;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::SessionError;

pub use boundary::{BoundaryReader, PromptMatcher};
pub use process::{DebuggerLauncher, DebuggerSession};
pub use target::TargetDescriptor;

/// 一次命令往返捕获的输出（提示符已剥离）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub stdout: String,
    pub stderr: String,
    /// 本次回复之前到达、不属于本条命令的完整输出（超时命令的迟到回复、多余的提示符周期）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub late: Vec<String>,
}

impl Exchange {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            late: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }
}

/// 一个存活的调试会话
///
/// 严格请求/响应：同一时刻最多一条命令在途（`&mut self` 保证）。
#[async_trait]
pub trait DebugSession: Send {
    fn id(&self) -> Uuid;

    fn is_alive(&self) -> bool;

    /// 成功完成的 send_and_await 次数
    fn steps(&self) -> usize;

    /// 启动后、第一个提示符之前的输出（横幅与首个停止位置）
    fn initial_output(&self) -> &Exchange;

    /// 发送一条命令并等待提示符边界；成功后步数加一
    ///
    /// 上一次调用以 Timeout 结束时，用同一条命令再次调用只继续等待它的回复，不会重复写入；
    /// 换成别的命令则先在 timeout 内等完旧回复（记入返回值的 `late`），再写入新命令。
    async fn send_and_await(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Exchange, SessionError>;

    /// 带外往返（如初始上下文转储），不计入步数
    async fn query(&mut self, command: &str, timeout: Duration) -> Result<Exchange, SessionError>;

    /// 结束子进程；重复调用无副作用
    async fn terminate(&mut self);
}

/// 按目标启动调试会话
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, target: &TargetDescriptor) -> Result<Box<dyn DebugSession>, SessionError>;
}
