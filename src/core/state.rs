//! 调试循环的状态机阶段
//!
//! STARTING → RUNNING → COMPLETING → DONE，任一阶段都可旁路进入 FAILED；DONE / FAILED 为终态。

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Starting,
    Running,
    Completing,
    Done,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopPhase::Done | LoopPhase::Failed)
    }

    /// 是否允许从 self 迁移到 next
    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Starting, Running) | (Running, Completing) | (Completing, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopPhase::Starting => "STARTING",
            LoopPhase::Running => "RUNNING",
            LoopPhase::Completing => "COMPLETING",
            LoopPhase::Done => "DONE",
            LoopPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
