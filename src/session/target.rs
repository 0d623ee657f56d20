//! 被调试目标的描述：脚本路径、参数与工作目录

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl TargetDescriptor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// 目标文件的实际位置（相对路径按工作目录解析）
    pub fn resolved_program(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) if self.program.is_relative() => dir.join(&self.program),
            _ => self.program.clone(),
        }
    }

    pub fn exists(&self) -> bool {
        Path::new(&self.resolved_program()).is_file()
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_resolution() {
        let target = TargetDescriptor::new("bug.py")
            .with_args(["--n", "3"])
            .with_working_dir("/srv/app");
        assert_eq!(target.to_string(), "bug.py --n 3");
        assert_eq!(target.resolved_program(), PathBuf::from("/srv/app/bug.py"));

        let absolute = TargetDescriptor::new("/opt/x.py").with_working_dir("/srv/app");
        assert_eq!(absolute.resolved_program(), PathBuf::from("/opt/x.py"));
    }

    #[test]
    fn test_exists() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(TargetDescriptor::new(file.path()).exists());
        assert!(!TargetDescriptor::new("/nonexistent/target.py").exists());
    }
}
