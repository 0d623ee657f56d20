//! Oracle 提示词：决策提示与总结提示
//!
//! 决策提示 = 系统说明（可用命令、`dump` 别名、两个标记、回复格式）+ 任务 + 完整转录 + 最近一次输出。
//! 每次都由完整转录重新生成，Oracle 看到的历史总是截至上一步、无遗漏、按步号排列。

use crate::chain::{TaskDescriptor, Transcript};
use crate::oracle::{Message, COMMAND_PREFIX, COMPLETION_MARKER, GIVE_UP_MARKER};

/// Oracle 可用的上下文转储别名
pub const DUMP_ALIAS: &str = "dump";

fn system_prompt() -> String {
    format!(
        "You are controlling an interactive Python debugger (pdb) to solve a debugging task.\n\
Each turn you choose the single next debugger command; it is executed and its output is added to the transcript.\n\
Standard pdb commands are available (next, step, continue, print <expr>, p <expr>, where, list, args, up, down, until, return, break <line>).\n\
The special command `{DUMP_ALIAS}` prints a JSON snapshot of the current location, locals and globals.\n\
When you have enough information to answer the task, reply with exactly `{COMPLETION_MARKER}`.\n\
If you cannot make progress with the debugger, reply with exactly `{GIVE_UP_MARKER}`.\n\
Otherwise reply with one command on a single line, optionally prefixed with `{COMMAND_PREFIX}`. Do not add explanations or markdown."
    )
}

/// 决策提示；clarification 为上一次回复无法解析时追加的说明
pub fn decision_messages(
    task: &TaskDescriptor,
    transcript: &Transcript,
    clarification: Option<&str>,
) -> Vec<Message> {
    let latest = transcript.latest_output();
    let mut user = format!(
        "Task: {}\nTarget script: {}\nCommands issued so far: {} of at most {}.\n\n--- Transcript ---\n{}--- End Transcript ---\n\n--- Most recent output ---\nSTDOUT:\n{}\nSTDERR:\n{}\n--- End output ---\n\nTask: {}\nWhat is the next command?",
        task.task,
        task.target,
        transcript.len(),
        task.max_steps,
        transcript.render(),
        latest.stdout.trim_end(),
        latest.stderr.trim_end(),
        task.task,
    );
    if let Some(note) = clarification {
        user.push_str("\n\n");
        user.push_str(note);
    }
    vec![Message::system(system_prompt()), Message::user(user)]
}

/// 总结提示：要求对完整转录给出结论，不再输出命令
pub fn summary_messages(task: &TaskDescriptor, transcript: &Transcript) -> Vec<Message> {
    let user = format!(
        "You have been operating a Python debugger (pdb) on '{}' to work on the task: '{}'.\n\
You replied `{COMPLETION_MARKER}`, indicating you have enough information.\n\
Provide a concise summary of your findings and the direct answer to the task, based on the session below.\n\
Do not output any debugger commands.\n\n--- Transcript ---\n{}--- End Transcript ---",
        task.target,
        task.task,
        transcript.render(),
    );
    vec![
        Message::system("You summarize debugging sessions."),
        Message::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Role;
    use crate::probe::ContextState;
    use crate::session::{Exchange, TargetDescriptor};

    fn task() -> TaskDescriptor {
        TaskDescriptor::new("report x", TargetDescriptor::new("t.py"), 5)
    }

    #[test]
    fn test_decision_prompt_contains_history_and_latest() {
        let mut t = Transcript::new();
        t.push("next", "next", Exchange::new("-> x = 42\n", ""), ContextState::NotRequested);
        t.push("p x", "p x", Exchange::new("42\n", "oops\n"), ContextState::NotRequested);
        let msgs = decision_messages(&task(), &t, None);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("task_complete"));
        assert!(msgs[0].content.contains("`dump`"));
        let user = &msgs[1].content;
        assert!(user.contains("Task: report x"));
        assert!(user.contains("Commands issued so far: 2 of at most 5."));
        assert!(user.contains("command: next"));
        assert!(user.contains("STDOUT:\n42\nSTDERR:\noops"));
    }

    #[test]
    fn test_clarification_is_appended() {
        let msgs = decision_messages(&task(), &Transcript::new(), Some("Reply with one line."));
        assert!(msgs[1].content.ends_with("Reply with one line."));
    }

    #[test]
    fn test_summary_prompt() {
        let msgs = summary_messages(&task(), &Transcript::new());
        assert!(msgs[1].content.contains("'report x'"));
        assert!(msgs[1].content.contains("Do not output any debugger commands."));
    }
}
