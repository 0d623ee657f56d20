//! 决策 Oracle 层：消息、客户端抽象与实现（OpenAI 兼容 / 脚本化），以及回复文法

pub mod action;
pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

pub use action::{
    parse_action, parse_summary, Action, COMMAND_PREFIX, COMPLETION_MARKER, GIVE_UP_MARKER,
};
pub use message::{Message, Role};
pub use mock::ScriptedOracle;
pub use openai::{OpenAiOracle, TokenUsage};
pub use traits::OracleClient;
