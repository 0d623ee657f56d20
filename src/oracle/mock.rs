//! 脚本化 Oracle（用于测试与离线演示，无需 API）
//!
//! 按顺序回放预设的回复或错误；脚本用尽后返回 fallback（未设置则报 Transport 错误）。
//! 记录每次收到的消息，便于断言提示词内容与调用次数。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::OracleError;
use crate::oracle::{Message, OracleClient};

#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    /// 脚本用尽后的回复
    fallback: Option<Result<String, OracleError>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// 回复与错误混排
    pub fn from_results(results: impl IntoIterator<Item = Result<String, OracleError>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 每次都返回同一条回复
    pub fn always(reply: impl Into<String>) -> Self {
        Self {
            fallback: Some(Ok(reply.into())),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, fallback: Result<String, OracleError>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 第 n 次调用收到的消息
    pub fn request(&self, n: usize) -> Option<Vec<Message>> {
        self.received.lock().ok().and_then(|r| r.get(n).cloned())
    }

    /// 最后一次调用中 user 消息的内容
    pub fn last_prompt(&self) -> Option<String> {
        let received = self.received.lock().ok()?;
        received
            .last()?
            .iter()
            .rev()
            .find(|m| m.role == crate::oracle::Role::User)
            .map(|m| m.content.clone())
    }
}

#[async_trait]
impl OracleClient for ScriptedOracle {
    async fn complete(&self, messages: &[Message]) -> Result<String, OracleError> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(result) => result,
            None => self
                .fallback
                .clone()
                .unwrap_or_else(|| Err(OracleError::Transport("oracle script exhausted".into()))),
        }
    }
}
