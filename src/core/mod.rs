//! 核心层：错误与恢复、状态机阶段、会话监管（取消）

pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{
    ErrorKind, FailureReport, LoopError, OracleError, RecoveryAction, SessionError,
};
pub use recovery::{RecoveryEngine, CLARIFICATION_NOTE, MAX_RETRIES};
pub use session_supervisor::SessionSupervisor;
pub use state::LoopPhase;
