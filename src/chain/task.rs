//! 任务描述：会话开始时给定一次，之后不再修改

use serde::{Deserialize, Serialize};

use crate::session::TargetDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// 自然语言任务
    pub task: String,
    pub target: TargetDescriptor,
    /// 最多派发的命令数
    pub max_steps: usize,
}

impl TaskDescriptor {
    pub fn new(task: impl Into<String>, target: TargetDescriptor, max_steps: usize) -> Self {
        Self {
            task: task.into(),
            target,
            max_steps,
        }
    }
}
