//! debugloop - 由 LLM 驱动的交互式调试器会话
//!
//! 模块划分：
//! - **chain**: 调试循环（任务、转录、提示词、事件、状态机主循环）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、循环阶段、会话监管（取消）
//! - **observability**: 日志初始化
//! - **oracle**: 决策 Oracle 客户端（OpenAI 兼容 / 脚本化）与回复文法
//! - **probe**: 上下文探针输出解析
//! - **session**: 调试器子进程会话（提示符边界、启动与回收）

pub mod chain;
pub mod config;
pub mod core;
pub mod observability;
pub mod oracle;
pub mod probe;
pub mod session;

pub use chain::{ChainOutcome, DebugChain, TaskDescriptor};
pub use config::{load_config, AppConfig};
