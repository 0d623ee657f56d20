//! Oracle 客户端抽象
//!
//! 所有后端（OpenAI 兼容 HTTP / 脚本化回放）实现 OracleClient：给定消息列表，返回一条自由文本回复。
//! 回复如何变成 Action 由 [`crate::oracle::parse_action`] 决定，与后端无关。

use async_trait::async_trait;

use crate::core::OracleError;
use crate::oracle::Message;

#[async_trait]
pub trait OracleClient: Send + Sync {
    /// 非流式完成；超时、非成功响应、响应体异常分别映射为不同的 OracleError
    async fn complete(&self, messages: &[Message]) -> Result<String, OracleError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
