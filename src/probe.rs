//! 上下文探针接口
//!
//! 探针本身运行在被调试解释器内部（外部协作者）；这里只负责解析它的输出：
//! 上下文转储命令捕获到的 stdout 中，最后一个非空行必须是一个 JSON 对象，含当前位置、局部变量、全局变量。
//! 之前的行（命令回显、程序输出）按位置忽略，不做内容嗅探。
//! 解析失败是可恢复的：记录原始文本并标记 "context unavailable"，循环继续。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::LoopError;

/// 探针在超出深度或条目上限时写入的标记
const TRUNCATION_MARKERS: &[&str] = &["<Max Depth Exceeded", "more items)", "more frames)"];

/// 当前执行位置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLocation {
    pub filename: Option<String>,
    pub lineno: Option<u64>,
    pub function: Option<String>,
}

/// 探针输出的结构化快照；调试循环只关心其有无与原始文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub location: Option<SourceLocation>,
    pub locals: Map<String, Value>,
    pub globals: Map<String, Value>,
    /// 任一绑定命中深度/大小上限
    pub truncated: bool,
    /// 探针输出的那一行 JSON
    pub raw: String,
}

impl ContextSnapshot {
    /// 解析单行 JSON 对象
    pub fn from_json_line(line: &str) -> Result<Self, LoopError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| LoopError::ContextProbe(format!("invalid JSON: {e}")))?;
        let Value::Object(mut obj) = value else {
            return Err(LoopError::ContextProbe("context dump is not a JSON object".into()));
        };
        if let Some(err) = obj.get("error").and_then(Value::as_str) {
            return Err(LoopError::ContextProbe(format!("probe reported: {err}")));
        }

        let location = obj
            .remove("location")
            .and_then(|v| serde_json::from_value::<SourceLocation>(v).ok());
        let locals = take_bindings(&mut obj, "locals");
        let globals = take_bindings(&mut obj, "globals");
        let truncated = obj.get("truncated").and_then(Value::as_bool).unwrap_or(false)
            || locals.values().any(has_truncation_marker)
            || globals.values().any(has_truncation_marker);

        Ok(Self {
            location,
            locals,
            globals,
            truncated,
            raw: line.to_string(),
        })
    }

    /// 供提示词使用的文本形式
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(loc) = &self.location {
            out.push_str(&format!(
                "location: {}:{} in {}\n",
                loc.filename.as_deref().unwrap_or("?"),
                loc.lineno.map(|n| n.to_string()).unwrap_or_else(|| "?".into()),
                loc.function.as_deref().unwrap_or("?"),
            ));
        }
        out.push_str(&format!("locals: {}\n", Value::Object(self.locals.clone())));
        out.push_str(&format!("globals: {}\n", Value::Object(self.globals.clone())));
        if self.truncated {
            out.push_str("(some values were truncated by the probe)\n");
        }
        out
    }
}

fn take_bindings(obj: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match obj.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn has_truncation_marker(value: &Value) -> bool {
    match value {
        Value::String(s) => TRUNCATION_MARKERS.iter().any(|m| s.contains(m)),
        Value::Array(items) => items.iter().any(has_truncation_marker),
        Value::Object(map) => map.contains_key("...") || map.values().any(has_truncation_marker),
        _ => false,
    }
}

/// 从上下文转储命令的 stdout 中取最后一个非空行并解析
pub fn parse_context_output(stdout: &str) -> Result<ContextSnapshot, LoopError> {
    let last = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| LoopError::ContextProbe("no output from context dump".into()))?;
    ContextSnapshot::from_json_line(last)
}

/// 一条转录记录中的上下文状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextState {
    /// 本步不是上下文转储
    NotRequested,
    Available { snapshot: ContextSnapshot },
    /// 探针输出无法使用；保留原始文本
    Unavailable { reason: String, raw: String },
}

impl ContextState {
    pub fn render(&self) -> String {
        match self {
            ContextState::NotRequested => String::new(),
            ContextState::Available { snapshot } => snapshot.render(),
            ContextState::Unavailable { reason, .. } => format!("context unavailable ({reason})\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_line_ignores_echo() {
        let stdout = "some echoed output\n{\"note\": \"not me\"}\n{\"location\": {\"filename\": \"t.py\", \"lineno\": 3, \"function\": \"<module>\"}, \"locals\": {\"x\": 42}, \"globals\": {}}\n";
        let snap = parse_context_output(stdout).unwrap();
        assert_eq!(snap.locals["x"], 42);
        let loc = snap.location.unwrap();
        assert_eq!(loc.filename.as_deref(), Some("t.py"));
        assert_eq!(loc.lineno, Some(3));
        assert!(!snap.truncated);
    }

    #[test]
    fn test_malformed_json_is_probe_error() {
        match parse_context_output("{\"locals\": {\"x\": ") {
            Err(LoopError::ContextProbe(reason)) => assert!(reason.contains("invalid JSON")),
            other => panic!("Expected ContextProbe, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_non_object_output() {
        assert!(matches!(parse_context_output("  \n\n"), Err(LoopError::ContextProbe(_))));
        assert!(matches!(parse_context_output("[1, 2]"), Err(LoopError::ContextProbe(_))));
        assert!(matches!(
            parse_context_output("{\"error\": \"Could not determine the current frame.\"}"),
            Err(LoopError::ContextProbe(_))
        ));
    }

    #[test]
    fn test_truncation_markers() {
        let line = r#"{"locals": {"big": [1, 2, "... (5 more items)"]}, "globals": {}}"#;
        assert!(parse_context_output(line).unwrap().truncated);
        let line = r#"{"locals": {"obj": "<Max Depth Exceeded: Node>"}}"#;
        assert!(parse_context_output(line).unwrap().truncated);
        let line = r#"{"locals": {}, "truncated": true}"#;
        assert!(parse_context_output(line).unwrap().truncated);
    }

    #[test]
    fn test_render() {
        let snap = parse_context_output(
            r#"{"location": {"filename": "t.py", "lineno": 1, "function": "f"}, "locals": {"x": 42}}"#,
        )
        .unwrap();
        let text = snap.render();
        assert!(text.contains("t.py:1 in f"));
        assert!(text.contains("\"x\":42"));
        assert_eq!(ContextState::NotRequested.render(), "");
    }
}
