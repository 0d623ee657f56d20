//! 提示符边界检测
//!
//! 调试器没有结构化分帧，"本条命令输出结束" 的唯一信号是它重新打印提示符并进入空闲。
//! BoundaryReader 把 stdout 字节块累积起来，仅当缓冲区以提示符结尾时切出一条完整输出；
//! 提示符前面可以是不带换行的残行（如 `print(x, end='')`），残行归入本条输出。
//! 提示符可以是字面量或正则，与具体调试器解耦。

use regex::Regex;

use crate::config::{ConfigError, SessionSection};

/// 提示符匹配器：字面量或正则
#[derive(Debug, Clone)]
pub enum PromptMatcher {
    Literal(String),
    /// 已锚定到缓冲区末尾的正则
    Pattern(Regex),
}

impl PromptMatcher {
    pub fn literal(prompt: impl Into<String>) -> Self {
        Self::Literal(prompt.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!(r"(?:{pattern})\z")).map(Self::Pattern)
    }

    /// `prompt_regex` 优先于 `prompt`
    pub fn from_config(cfg: &SessionSection) -> Result<Self, ConfigError> {
        match &cfg.prompt_regex {
            Some(pattern) => Self::regex(pattern)
                .map_err(|e| ConfigError::Invalid(format!("session.prompt_regex: {e}"))),
            None if cfg.prompt.is_empty() => {
                Err(ConfigError::Invalid("session.prompt must not be empty".into()))
            }
            None => Ok(Self::literal(cfg.prompt.clone())),
        }
    }

    /// 若 text 以提示符结尾，返回提示符的起始偏移
    pub fn trailing_match(&self, text: &str) -> Option<usize> {
        match self {
            PromptMatcher::Literal(prompt) => {
                if prompt.is_empty() || !text.ends_with(prompt.as_str()) {
                    return None;
                }
                Some(text.len() - prompt.len())
            }
            PromptMatcher::Pattern(re) => {
                let m = re.find(text)?;
                (m.start() != m.end()).then_some(m.start())
            }
        }
    }
}

/// 按提示符边界切分 stdout 字节流
#[derive(Debug, Clone)]
pub struct BoundaryReader {
    matcher: PromptMatcher,
    pending: Vec<u8>,
}

impl BoundaryReader {
    pub fn new(matcher: PromptMatcher) -> Self {
        Self {
            matcher,
            pending: Vec::new(),
        }
    }

    /// 追加一块输出；若此时缓冲区以提示符结尾，返回提示符之前的内容并清空缓冲区。
    ///
    /// 块可能在任意字节处截断（包括多字节字符中间）：截断的尾部解码为替换字符，
    /// 不会与提示符匹配，因此会继续等待后续字节。
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);
        let text = String::from_utf8_lossy(&self.pending);
        let start = self.matcher.trailing_match(&text)?;
        let output = text[..start].to_string();
        self.pending.clear();
        Some(output)
    }

    /// 尚未遇到边界的部分输出
    pub fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdb_reader() -> BoundaryReader {
        BoundaryReader::new(PromptMatcher::literal("(Pdb) "))
    }

    #[test]
    fn test_boundary_in_single_chunk() {
        let mut reader = pdb_reader();
        let out = reader.push(b"> /tmp/t.py(1)<module>()\n-> x = 42\n(Pdb) ");
        assert_eq!(out.as_deref(), Some("> /tmp/t.py(1)<module>()\n-> x = 42\n"));
        assert!(!reader.has_pending());
    }

    #[test]
    fn test_prompt_split_across_chunks() {
        let mut reader = pdb_reader();
        assert_eq!(reader.push(b"42\n(Pd"), None);
        assert_eq!(reader.pending_text(), "42\n(Pd");
        assert_eq!(reader.push(b"b) ").as_deref(), Some("42\n"));
    }

    #[test]
    fn test_prompt_not_at_end_does_not_match() {
        let mut reader = pdb_reader();
        assert_eq!(reader.push(b"(Pdb) still printing\n"), None);
    }

    #[test]
    fn test_prompt_text_inside_output_is_not_a_boundary() {
        let mut reader = pdb_reader();
        assert_eq!(reader.push(b"print('(Pdb) ')"), None);
        assert_eq!(reader.push(b"\n(Pdb) ").as_deref(), Some("print('(Pdb) ')\n"));
    }

    #[test]
    fn test_prompt_after_partial_line() {
        let mut reader = pdb_reader();
        assert_eq!(reader.push(b"partial-line(Pdb) ").as_deref(), Some("partial-line"));
        assert!(!reader.has_pending());
    }

    #[test]
    fn test_bare_prompt_yields_empty_output() {
        let mut reader = pdb_reader();
        assert_eq!(reader.push(b"(Pdb) ").as_deref(), Some(""));
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut reader = pdb_reader();
        let text = "名字\n(Pdb) ".as_bytes();
        assert_eq!(reader.push(&text[..2]), None);
        assert_eq!(reader.push(&text[2..]).as_deref(), Some("名字\n"));
    }

    #[test]
    fn test_regex_matcher() {
        let matcher = PromptMatcher::regex(r"\((?:Pdb|lldb)\) ").unwrap();
        assert_eq!(matcher.trailing_match("frame #0\n(lldb) "), Some(9));
        assert_eq!(matcher.trailing_match("(Pdb) "), Some(0));
        assert_eq!(matcher.trailing_match("(gdb) "), None);
        assert_eq!(matcher.trailing_match("x(Pdb) "), Some(1));
    }

    #[test]
    fn test_from_config_prefers_regex() {
        let mut cfg = SessionSection::default();
        assert!(matches!(
            PromptMatcher::from_config(&cfg).unwrap(),
            PromptMatcher::Literal(ref p) if p == "(Pdb) "
        ));
        cfg.prompt_regex = Some(r"\(gdb\) ".into());
        assert!(matches!(PromptMatcher::from_config(&cfg).unwrap(), PromptMatcher::Pattern(_)));
        cfg.prompt_regex = Some("(".into());
        assert!(matches!(PromptMatcher::from_config(&cfg), Err(ConfigError::Invalid(_))));
    }
}
