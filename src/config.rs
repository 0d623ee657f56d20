//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：内置默认值 → config/default.toml → 显式指定的文件 → 环境变量 `DEBUGLOOP__*`
//! （双下划线表示嵌套，如 `DEBUGLOOP__ORACLE__MODEL=openai/gpt-4o`）。
//! 配置在进程启动时构造一次，之后以不可变值显式传给 Oracle 客户端与调试循环。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// 凭证的便捷回退变量，仅在 [`load_config`] 内读取
pub const CREDENTIAL_FALLBACK_ENV: &str = "OPENROUTER_API_KEY";

/// 配置加载或校验失败
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing oracle credential: set oracle.api_key, DEBUGLOOP__ORACLE__API_KEY or OPENROUTER_API_KEY")]
    MissingCredential,

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub oracle: OracleSection,
    pub session: SessionSection,
    pub chain: ChainSection,
}

/// [oracle] 段：决策端点、模型与超时
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    /// 必填凭证；缺失时 validate 失败
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "openai/gpt-3.5-turbo".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            timeout_secs: 60,
        }
    }
}

// 凭证不进日志
impl fmt::Debug for OracleSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleSection")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl OracleSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// [session] 段：调试器进程、提示符与各阶段超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 调试器可执行文件
    pub debugger: String,
    /// 目标脚本之前的调试器参数
    pub debugger_args: Vec<String>,
    /// 字面量提示符
    pub prompt: String,
    /// 设置后取代 `prompt`
    pub prompt_regex: Option<String>,
    pub command_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub context_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub quit_command: String,
    /// 让探针输出 JSON 上下文的命令
    pub context_command: String,
    /// 探针模块所在目录，前置到子进程的 PYTHONPATH
    pub probe_dir: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            debugger: "python3".to_string(),
            debugger_args: vec!["-m".to_string(), "pdb".to_string()],
            prompt: "(Pdb) ".to_string(),
            prompt_regex: None,
            command_timeout_secs: 5,
            startup_timeout_secs: 5,
            context_timeout_secs: 15,
            shutdown_timeout_secs: 5,
            quit_command: "quit".to_string(),
            context_command:
                "import dump_pdb_context; print(dump_pdb_context.pdb_get_context_json())"
                    .to_string(),
            probe_dir: None,
        }
    }
}

impl SessionSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn context_timeout(&self) -> Duration {
        Duration::from_secs(self.context_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// [chain] 段：循环步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainSection {
    pub max_steps: usize,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self { max_steps: 10 }
    }
}

impl AppConfig {
    /// 取凭证；未配置时返回 MissingCredential
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.oracle
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingCredential)
    }

    /// 校验必填项与数值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_key()?;
        if self.chain.max_steps == 0 {
            return Err(ConfigError::Invalid("chain.max_steps must be > 0".into()));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(ConfigError::Invalid("oracle.timeout_secs must be > 0".into()));
        }
        let s = &self.session;
        if s.command_timeout_secs == 0 || s.startup_timeout_secs == 0 || s.context_timeout_secs == 0 {
            return Err(ConfigError::Invalid("session timeouts must be > 0".into()));
        }
        if s.prompt_regex.is_none() && s.prompt.is_empty() {
            return Err(ConfigError::Invalid("session.prompt must not be empty".into()));
        }
        Ok(())
    }

    /// 凭证缺失时用回退值补齐
    fn with_credential_fallback(mut self, fallback: Option<String>) -> Self {
        if self.api_key().is_err() {
            if let Some(key) = fallback.filter(|k| !k.trim().is_empty()) {
                self.oracle.api_key = Some(key);
            }
        }
        self
    }
}

/// 从 config 目录加载配置，环境变量 DEBUGLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 叠加环境变量 DEBUGLOOP__*（双下划线表示嵌套键）
/// 4. 凭证仍缺失时读取 `OPENROUTER_API_KEY`
///
/// 不做校验：调用方在覆盖命令行参数后调用 [`AppConfig::validate`]。
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DEBUGLOOP")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    Ok(cfg.with_credential_fallback(std::env::var(CREDENTIAL_FALLBACK_ENV).ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.chain.max_steps, 10);
        assert_eq!(cfg.session.prompt, "(Pdb) ");
        assert_eq!(cfg.session.debugger_args, vec!["-m", "pdb"]);
        assert_eq!(cfg.oracle.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(cfg.oracle.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_requires_credential() {
        let cfg = AppConfig::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingCredential)));

        let mut cfg = AppConfig::default();
        cfg.oracle.api_key = Some("   ".into());
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingCredential)));

        cfg.oracle.api_key = Some("sk-test".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut cfg = AppConfig::default();
        cfg.oracle.api_key = Some("sk-test".into());
        cfg.chain.max_steps = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_credential_fallback_only_fills_missing() {
        let cfg = AppConfig::default().with_credential_fallback(Some("from-env".into()));
        assert_eq!(cfg.api_key().unwrap(), "from-env");

        let mut explicit = AppConfig::default();
        explicit.oracle.api_key = Some("explicit".into());
        let cfg = explicit.with_credential_fallback(Some("from-env".into()));
        assert_eq!(cfg.api_key().unwrap(), "explicit");
    }

    #[test]
    fn test_debug_redacts_key() {
        let mut cfg = AppConfig::default();
        cfg.oracle.api_key = Some("sk-secret".into());
        let shown = format!("{:?}", cfg);
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[chain]\nmax_steps = 3\n\n[session]\nprompt = \"(lldb) \"\ncommand_timeout_secs = 2\n\n[oracle]\napi_key = \"sk-file\""
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.chain.max_steps, 3);
        assert_eq!(cfg.session.prompt, "(lldb) ");
        assert_eq!(cfg.session.command_timeout_secs, 2);
        assert_eq!(cfg.session.quit_command, "quit");
        assert_eq!(cfg.api_key().unwrap(), "sk-file");
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let result = load_config(Some(PathBuf::from("/nonexistent/debugloop.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
