//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（默认 OpenRouter，可配置 base_url）。
//! 凭证与模型来自不可变的 [oracle] 配置，不在调用路径上读取环境变量。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ConfigError};
use crate::core::OracleError;
use crate::oracle::{Message, OracleClient, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容 Oracle：持有 Client、model 与单次请求超时，complete 时取首条 choice 的 content
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    pub usage: TokenUsage,
}

impl OpenAiOracle {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout,
            usage: TokenUsage::new(),
        }
    }

    /// 从已校验的配置构建；凭证缺失返回 MissingCredential
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let api_key = cfg.api_key()?;
        Ok(Self::new(
            &cfg.oracle.base_url,
            &cfg.oracle.model,
            api_key,
            cfg.oracle.timeout(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect()
    }
}

/// 把客户端错误归入 Oracle 错误种类
fn classify(err: OpenAIError) -> OracleError {
    match err {
        OpenAIError::ApiError(api) => OracleError::Http(api.message),
        OpenAIError::JSONDeserialize(e, ..) => {
            OracleError::MalformedBody(format!("failed to deserialize response: {e}"))
        }
        OpenAIError::InvalidArgument(msg) => OracleError::MalformedBody(msg),
        other => OracleError::Transport(other.to_string()),
    }
}

#[async_trait]
impl OracleClient for OpenAiOracle {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, OracleError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages).map_err(classify)?)
            .build()
            .map_err(classify)?;

        info!(model = %self.model, messages = messages.len(), "querying oracle");
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                warn!(model = %self.model, timeout_secs = self.timeout.as_secs(), "oracle request timed out");
                OracleError::Timeout(self.timeout.as_secs())
            })?
            .map_err(|e| {
                warn!(model = %self.model, error = %e, "oracle request failed");
                classify(e)
            })?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choice = response
            .choices
            .first()
            .ok_or_else(|| OracleError::MalformedBody("response has no choices".into()))?;
        let content = choice
            .message
            .content
            .clone()
            .ok_or_else(|| OracleError::MalformedBody("response has no message content".into()))?;
        debug!(reply = %content, "oracle replied");
        Ok(content)
    }
}
