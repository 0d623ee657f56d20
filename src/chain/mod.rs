//! 调试循环层：任务、转录、提示词、过程事件与 STARTING → RUNNING → COMPLETING → DONE/FAILED 主循环

pub mod events;
pub mod loop_;
pub mod prompt;
pub mod task;
pub mod transcript;

pub use events::ChainEvent;
pub use loop_::{ChainOutcome, ChainSettings, DebugChain, OracleUsage, SummaryStatus};
pub use prompt::{decision_messages, summary_messages, DUMP_ALIAS};
pub use task::TaskDescriptor;
pub use transcript::{StepRecord, Transcript};
