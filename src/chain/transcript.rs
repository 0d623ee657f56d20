//! 转录：按步号排列的往返记录，只追加
//!
//! 步号由 push 分配（从 1 开始、连续无空洞），调用方无法写入任意步号；已有记录不提供可变访问。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::ContextState;
use crate::session::Exchange;

/// 一次完成的命令往返
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    /// 实际发给调试器的命令（`dump` 已展开）
    pub command: String,
    /// Oracle 的原始回复
    pub oracle_reply: String,
    pub output: Exchange,
    pub context: ContextState,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// 启动时消费的输出（横幅与首个停止位置）
    pub initial_output: Exchange,
    /// 启动后的首次上下文转储
    pub initial_context: ContextState,
    records: Vec<StepRecord>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self {
            initial_output: Exchange::default(),
            initial_context: ContextState::NotRequested,
            records: Vec::new(),
        }
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条记录，返回其步号
    pub fn push(
        &mut self,
        command: impl Into<String>,
        oracle_reply: impl Into<String>,
        output: Exchange,
        context: ContextState,
    ) -> usize {
        let step = self.records.len() + 1;
        self.records.push(StepRecord {
            step,
            command: command.into(),
            oracle_reply: oracle_reply.into(),
            output,
            context,
            completed_at: Utc::now(),
        });
        step
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn commands(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.command.as_str()).collect()
    }

    /// 最近一次捕获的输出（无记录时为启动输出）
    pub fn latest_output(&self) -> &Exchange {
        self.records
            .last()
            .map(|r| &r.output)
            .unwrap_or(&self.initial_output)
    }

    /// 供提示词使用的完整文本
    pub fn render(&self) -> String {
        let mut out = String::from("=== initial state ===\n");
        push_exchange(&mut out, &self.initial_output);
        out.push_str(&self.initial_context.render());
        for r in &self.records {
            out.push_str(&format!("=== step {} ===\ncommand: {}\n", r.step, r.command));
            push_exchange(&mut out, &r.output);
            out.push_str(&r.context.render());
        }
        out
    }
}

fn push_exchange(out: &mut String, exchange: &Exchange) {
    for late in exchange.late.iter().filter(|l| !l.trim().is_empty()) {
        out.push_str("late output (from an earlier command):\n");
        out.push_str(late.trim_end());
        out.push('\n');
    }
    if !exchange.stdout.trim().is_empty() {
        out.push_str("stdout:\n");
        out.push_str(exchange.stdout.trim_end());
        out.push('\n');
    }
    if !exchange.stderr.trim().is_empty() {
        out.push_str("stderr:\n");
        out.push_str(exchange.stderr.trim_end());
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_gapless() {
        let mut t = Transcript::new();
        for cmd in ["next", "step", "p x"] {
            t.push(cmd, cmd, Exchange::new("ok\n", ""), ContextState::NotRequested);
        }
        let steps: Vec<usize> = t.records().iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert_eq!(t.commands(), vec!["next", "step", "p x"]);
    }

    #[test]
    fn test_latest_output_falls_back_to_initial() {
        let mut t = Transcript::new();
        t.initial_output = Exchange::new("> t.py(1)<module>()\n", "");
        assert_eq!(t.latest_output().stdout, "> t.py(1)<module>()\n");
        t.push("next", "next", Exchange::new("-> y = 2\n", "warn\n"), ContextState::NotRequested);
        assert_eq!(t.latest_output().stderr, "warn\n");
    }

    #[test]
    fn test_render_includes_every_step() {
        let mut t = Transcript::new();
        t.initial_output = Exchange::new("banner\n", "");
        t.push("next", "next", Exchange::new("line 2\n", ""), ContextState::NotRequested);
        t.push(
            "dump-cmd",
            "dump",
            Exchange::new("garbage", ""),
            ContextState::Unavailable {
                reason: "invalid JSON".into(),
                raw: "garbage".into(),
            },
        );
        let text = t.render();
        assert!(text.contains("banner"));
        assert!(text.contains("=== step 1 ===\ncommand: next"));
        assert!(text.contains("=== step 2 ==="));
        assert!(text.contains("context unavailable"));
        assert!(text.find("step 1").unwrap() < text.find("step 2").unwrap());
    }

    #[test]
    fn test_render_shows_late_output_before_reply() {
        let mut t = Transcript::new();
        let mut output = Exchange::new("echo: p x\n", "");
        output.late.push("slow-done\n".into());
        t.push("p x", "p x", output, ContextState::NotRequested);
        let text = t.render();
        let late = text.find("late output (from an earlier command):\nslow-done").unwrap();
        assert!(late < text.find("stdout:\necho: p x").unwrap());
    }
}
