//! Oracle 回复 → Action 的固定文法
//!
//! 对去掉首尾空白的回复，按顺序匹配，先中先得：
//! 1. 空回复 → 解析错误
//! 2. 去掉一层包裹整段的 Markdown 代码围栏
//! 3. 任一行（去掉空白与反引号后）等于 `task_complete`（不区分大小写）→ TaskComplete；完成标记优先于任何命令文本
//! 4. 任一行等于 `task_error` → GiveUp
//! 5. 首个以 `CMD:` 开头的行（不区分大小写）→ RawCommand(其余部分)；其余部分为空 → 解析错误
//! 6. 否则整段回复必须恰好是一个非空行 → RawCommand；多行且无标记 → 解析错误
//!
//! 总结回复：非空文本 → SummaryText，否则解析错误。

use serde::{Deserialize, Serialize};

use crate::core::OracleError;

pub const COMPLETION_MARKER: &str = "task_complete";
pub const GIVE_UP_MARKER: &str = "task_error";
pub const COMMAND_PREFIX: &str = "CMD:";

/// Oracle 决定的下一步
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Action {
    RawCommand(String),
    TaskComplete,
    /// Oracle 判断无法继续
    GiveUp,
    SummaryText(String),
}

fn strip_fence(text: &str) -> &str {
    let Some(inner) = text
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return text;
    };
    // 围栏首行可能是语言标记（```pdb）
    match inner.split_once('\n') {
        Some((_lang, body)) => body.trim(),
        None => inner.trim(),
    }
}

fn normalize(line: &str) -> &str {
    line.trim().trim_matches('`').trim()
}

fn strip_command_prefix(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let head = line.get(..COMMAND_PREFIX.len())?;
    head.eq_ignore_ascii_case(COMMAND_PREFIX)
        .then(|| &line[COMMAND_PREFIX.len()..])
}

/// 把决策回复解析为 Action
pub fn parse_action(reply: &str) -> Result<Action, OracleError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(OracleError::Parse("empty reply".into()));
    }
    let body = strip_fence(trimmed);
    let lines: Vec<&str> = body.lines().map(normalize).filter(|l| !l.is_empty()).collect();

    if lines.iter().any(|l| l.eq_ignore_ascii_case(COMPLETION_MARKER)) {
        return Ok(Action::TaskComplete);
    }
    if lines.iter().any(|l| l.eq_ignore_ascii_case(GIVE_UP_MARKER)) {
        return Ok(Action::GiveUp);
    }
    if let Some(rest) = body.lines().find_map(strip_command_prefix) {
        let command = normalize(rest);
        if command.is_empty() {
            return Err(OracleError::Parse("empty command after CMD: marker".into()));
        }
        return Ok(Action::RawCommand(command.to_string()));
    }
    match lines.as_slice() {
        [single] => Ok(Action::RawCommand(single.to_string())),
        [] => Err(OracleError::Parse("reply contains no command".into())),
        _ => Err(OracleError::Parse(format!(
            "multi-line reply without a {COMMAND_PREFIX} marker: {}",
            preview(trimmed)
        ))),
    }
}

/// 把总结请求的回复解析为 SummaryText
pub fn parse_summary(reply: &str) -> Result<Action, OracleError> {
    let text = reply.trim();
    if text.is_empty() {
        return Err(OracleError::Parse("empty summary".into()));
    }
    Ok(Action::SummaryText(text.to_string()))
}

fn preview(text: &str) -> String {
    const MAX: usize = 120;
    if text.chars().count() > MAX {
        let head: String = text.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(s: &str) -> Action {
        Action::RawCommand(s.to_string())
    }

    #[test]
    fn test_single_line_command() {
        assert_eq!(parse_action("next").unwrap(), cmd("next"));
        assert_eq!(parse_action("  p x  \n").unwrap(), cmd("p x"));
        assert_eq!(parse_action("`where`").unwrap(), cmd("where"));
    }

    #[test]
    fn test_completion_marker_wins_over_command() {
        assert_eq!(parse_action("task_complete").unwrap(), Action::TaskComplete);
        assert_eq!(parse_action("TASK_COMPLETE").unwrap(), Action::TaskComplete);
        assert_eq!(
            parse_action("CMD: p x\ntask_complete").unwrap(),
            Action::TaskComplete
        );
        assert_eq!(
            parse_action("task_error\ntask_complete").unwrap(),
            Action::TaskComplete
        );
    }

    #[test]
    fn test_give_up_marker() {
        assert_eq!(parse_action("task_error").unwrap(), Action::GiveUp);
        assert_eq!(parse_action("I am stuck.\ntask_error").unwrap(), Action::GiveUp);
    }

    #[test]
    fn test_command_prefix_extracts_from_explanation() {
        let reply = "The variable is set on line 3.\nCMD: p value\nThat will show it.";
        assert_eq!(parse_action(reply).unwrap(), cmd("p value"));
        assert_eq!(parse_action("cmd:   until 10").unwrap(), cmd("until 10"));
        assert!(matches!(parse_action("CMD:   "), Err(OracleError::Parse(_))));
    }

    #[test]
    fn test_fenced_reply() {
        assert_eq!(parse_action("```\nnext\n```").unwrap(), cmd("next"));
        assert_eq!(parse_action("```pdb\np x\n```").unwrap(), cmd("p x"));
        assert_eq!(parse_action("```step```").unwrap(), cmd("step"));
    }

    #[test]
    fn test_unparseable_replies() {
        assert!(matches!(parse_action(""), Err(OracleError::Parse(_))));
        assert!(matches!(parse_action("   \n "), Err(OracleError::Parse(_))));
        assert!(matches!(parse_action("```\n```"), Err(OracleError::Parse(_))));
        assert!(matches!(
            parse_action("I think we should\nlook at x first"),
            Err(OracleError::Parse(_))
        ));
    }

    #[test]
    fn test_marker_inside_sentence_is_a_command_not_completion() {
        // 标记必须独占一行
        assert_eq!(
            parse_action("p 'task_complete soon'").unwrap(),
            cmd("p 'task_complete soon'")
        );
    }

    #[test]
    fn test_parse_summary() {
        assert_eq!(
            parse_summary("  x was 42.  ").unwrap(),
            Action::SummaryText("x was 42.".into())
        );
        assert!(matches!(parse_summary("\n"), Err(OracleError::Parse(_))));
    }
}
