//! 调试器子进程会话
//!
//! 通过 tokio::process 启动调试器（默认 `python3 -m pdb <target>`），stdin/stdout/stderr 全部走管道。
//! stdout 与 stderr 各由一个读任务按字节块转发到同一个 channel，互不阻塞；
//! send_and_await 写入一行命令后消费 channel，直到 stdout 出现提示符边界或超时。
//! 超时的命令仍记为在途：重试只继续等待，换新命令前先等完旧回复，其输出作为迟到输出交给下一次往返。
//! 两条流独立缓冲，不保证它们之间的字节级交错顺序。

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, SessionSection};
use crate::core::SessionError;
use crate::session::{
    BoundaryReader, DebugSession, Exchange, PromptMatcher, SessionLauncher, TargetDescriptor,
};

const READ_CHUNK_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
enum StreamEvent {
    Data(Stream, Vec<u8>),
    Closed(Stream),
}

fn spawn_reader<R>(mut pipe: R, stream: Stream, tx: mpsc::UnboundedSender<StreamEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(StreamEvent::Data(stream, buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(?stream, error = %e, "debugger pipe read failed");
                    break;
                }
            }
        }
        let _ = tx.send(StreamEvent::Closed(stream));
    })
}

/// 一个存活的调试器子进程
pub struct DebuggerSession {
    id: Uuid,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    readers: Vec<JoinHandle<()>>,
    reader: BoundaryReader,
    /// 两次边界之间收到的 stderr
    stderr_buf: String,
    /// 已写入但尚未见到边界的命令
    outstanding: Option<String>,
    /// 等待交给下一次往返的迟到输出
    late: Vec<String>,
    /// 全部原始输出（只追加），启动失败时用于报错
    raw_output: String,
    initial: Exchange,
    alive: bool,
    terminated: bool,
    steps: usize,
    quit_command: String,
    shutdown_timeout: Duration,
}

impl DebuggerSession {
    /// 启动调试器并消费首个提示符
    ///
    /// 目标文件缺失、可执行文件无法启动、或首个提示符出现前进程退出/超时，均返回 `SessionError::Launch`。
    pub async fn start(
        target: &TargetDescriptor,
        cfg: &SessionSection,
        matcher: PromptMatcher,
    ) -> Result<Self, SessionError> {
        if !target.exists() {
            return Err(SessionError::Launch(format!(
                "target not found: {}",
                target.resolved_program().display()
            )));
        }

        let mut cmd = Command::new(&cfg.debugger);
        cmd.args(&cfg.debugger_args)
            .arg(&target.program)
            .args(&target.args)
            .env("PYTHONBREAKPOINT", "pdb.set_trace")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &target.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(probe_dir) = &cfg.probe_dir {
            cmd.env("PYTHONPATH", python_path_with(probe_dir.as_os_str()));
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::Launch(format!("{}: {}", cfg.debugger, e)))?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.kill().await;
            return Err(SessionError::Launch("debugger pipes were not captured".into()));
        };

        let (tx, events) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_reader(stdout, Stream::Stdout, tx.clone()),
            spawn_reader(stderr, Stream::Stderr, tx),
        ];

        let mut session = Self {
            id: Uuid::new_v4(),
            child: Some(child),
            stdin: Some(stdin),
            events,
            readers,
            reader: BoundaryReader::new(matcher),
            stderr_buf: String::new(),
            outstanding: None,
            late: Vec::new(),
            raw_output: String::new(),
            initial: Exchange::default(),
            alive: true,
            terminated: false,
            steps: 0,
            quit_command: cfg.quit_command.clone(),
            shutdown_timeout: cfg.shutdown_timeout(),
        };
        info!(session = %session.id, ?pid, script = %target, debugger = %cfg.debugger, "debugger started");

        match session.read_until_boundary(cfg.startup_timeout()).await {
            Ok(initial) => {
                debug!(session = %session.id, stdout = %initial.stdout, "initial debugger output consumed");
                session.initial = initial;
                Ok(session)
            }
            Err(e) => {
                let tail = session.raw_output.clone();
                session.terminate().await;
                let reason = match e {
                    SessionError::Dead => "debugger exited before its first prompt".to_string(),
                    SessionError::Timeout { timeout_ms, .. } => {
                        format!("no prompt within {timeout_ms}ms of startup")
                    }
                    other => other.to_string(),
                };
                Err(SessionError::Launch(format!("{reason}; output: {}", tail.trim())))
            }
        }
    }

    fn record_raw(&mut self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.raw_output.push_str(&text);
        text
    }

    async fn read_until_boundary(&mut self, timeout: Duration) -> Result<Exchange, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) => {
                    return Err(SessionError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                        partial: self.reader.pending_text(),
                    })
                }
                Ok(None) => {
                    self.alive = false;
                    return Err(SessionError::Dead);
                }
                Ok(Some(event)) => event,
            };
            match event {
                StreamEvent::Data(Stream::Stdout, bytes) => {
                    self.record_raw(&bytes);
                    if let Some(stdout) = self.reader.push(&bytes) {
                        let late = std::mem::take(&mut self.late);
                        self.drain_ready();
                        let stderr = std::mem::take(&mut self.stderr_buf);
                        return Ok(Exchange { stdout, stderr, late });
                    }
                }
                StreamEvent::Data(Stream::Stderr, bytes) => {
                    let text = self.record_raw(&bytes);
                    self.stderr_buf.push_str(&text);
                }
                StreamEvent::Closed(Stream::Stdout) => {
                    warn!(session = %self.id, "debugger stdout closed");
                    self.alive = false;
                    return Err(SessionError::Dead);
                }
                StreamEvent::Closed(Stream::Stderr) => {}
            }
        }
    }

    /// 边界之后已到达的事件：收下 stderr，记录 stdout 关闭，多出的完整输出留给下一次往返
    fn drain_ready(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                StreamEvent::Data(Stream::Stderr, bytes) => {
                    let text = self.record_raw(&bytes);
                    self.stderr_buf.push_str(&text);
                }
                StreamEvent::Data(Stream::Stdout, bytes) => {
                    self.record_raw(&bytes);
                    if let Some(extra) = self.reader.push(&bytes) {
                        warn!(session = %self.id, output = %extra, "debugger printed an extra prompt, keeping output as late");
                        self.late.push(extra);
                    }
                }
                StreamEvent::Closed(Stream::Stdout) => {
                    warn!(session = %self.id, "debugger stdout closed after prompt");
                    self.alive = false;
                }
                StreamEvent::Closed(Stream::Stderr) => {}
            }
        }
    }

    async fn exchange(&mut self, command: &str, timeout: Duration) -> Result<Exchange, SessionError> {
        if self.terminated || !self.alive {
            return Err(SessionError::Dead);
        }
        if let Some(pending) = self.outstanding.clone() {
            if pending == command {
                info!(session = %self.id, command = %command, "awaiting reply of timed-out command again");
                return self.await_reply(timeout).await;
            }
            let stale = self.await_reply(timeout).await?;
            warn!(session = %self.id, command = %pending, "late reply of timed-out command arrived");
            self.late.extend(stale.late);
            self.late.push(stale.stdout + &stale.stderr);
        }

        let stdin = self.stdin.as_mut().ok_or(SessionError::Dead)?;
        let line = format!("{command}\n");
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                warn!(session = %self.id, "debugger stdin pipe is broken");
                self.alive = false;
                return Err(SessionError::Dead);
            }
            return Err(SessionError::Io(e.to_string()));
        }
        info!(session = %self.id, command = %command, "sent command to debugger");
        self.outstanding = Some(command.to_string());
        self.await_reply(timeout).await
    }

    /// 等待在途命令的边界；只有超时才让它保持在途
    async fn await_reply(&mut self, timeout: Duration) -> Result<Exchange, SessionError> {
        let reply = self.read_until_boundary(timeout).await;
        if !matches!(reply, Err(SessionError::Timeout { .. })) {
            self.outstanding = None;
        }
        reply
    }
}

#[async_trait]
impl DebugSession for DebuggerSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn is_alive(&self) -> bool {
        self.alive && !self.terminated
    }

    fn steps(&self) -> usize {
        self.steps
    }

    fn initial_output(&self) -> &Exchange {
        &self.initial
    }

    async fn send_and_await(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Exchange, SessionError> {
        let exchange = self.exchange(command, timeout).await?;
        self.steps += 1;
        Ok(exchange)
    }

    async fn query(&mut self, command: &str, timeout: Duration) -> Result<Exchange, SessionError> {
        self.exchange(command, timeout).await
    }

    /// 先发退出命令，超时未退出则 kill；关闭管道并停止读任务
    async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if let Some(mut stdin) = self.stdin.take() {
            if self.alive {
                let quit = format!("{}\n", self.quit_command);
                if let Err(e) = stdin.write_all(quit.as_bytes()).await {
                    debug!(session = %self.id, error = %e, "could not send quit command");
                }
                let _ = stdin.flush().await;
            }
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(session = %self.id, code = ?status.code(), "debugger exited");
                }
                Ok(Err(e)) => warn!(session = %self.id, error = %e, "waiting for debugger failed"),
                Err(_) => {
                    warn!(
                        session = %self.id,
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "debugger did not exit after quit, killing"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(session = %self.id, error = %e, "failed to kill debugger");
                    }
                }
            }
        }

        for handle in self.readers.drain(..) {
            handle.abort();
        }
        self.events.close();
        self.alive = false;
        info!(session = %self.id, "debugger session cleaned up");
    }
}

fn python_path_with(dir: &std::ffi::OsStr) -> OsString {
    let mut paths = vec![std::path::PathBuf::from(dir)];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).unwrap_or_else(|_| dir.to_os_string())
}

/// 按 [session] 配置启动 DebuggerSession
#[derive(Debug, Clone)]
pub struct DebuggerLauncher {
    cfg: SessionSection,
    matcher: PromptMatcher,
}

impl DebuggerLauncher {
    pub fn new(cfg: SessionSection) -> Result<Self, ConfigError> {
        let matcher = PromptMatcher::from_config(&cfg)?;
        Ok(Self { cfg, matcher })
    }
}

#[async_trait]
impl SessionLauncher for DebuggerLauncher {
    async fn launch(&self, target: &TargetDescriptor) -> Result<Box<dyn DebugSession>, SessionError> {
        let session = DebuggerSession::start(target, &self.cfg, self.matcher.clone()).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_path_prepends_probe_dir() {
        let joined = python_path_with(std::ffi::OsStr::new("/opt/probe"));
        let first = std::env::split_paths(&joined).next().unwrap();
        assert_eq!(first, std::path::PathBuf::from("/opt/probe"));
    }

    #[test]
    fn test_launcher_rejects_bad_prompt_regex() {
        let cfg = SessionSection {
            prompt_regex: Some("(".into()),
            ..SessionSection::default()
        };
        assert!(DebuggerLauncher::new(cfg).is_err());
    }

    /// 没有子进程的会话，事件由测试直接注入；任何写 stdin 的尝试都会得到 Dead
    fn detached_session() -> (DebuggerSession, mpsc::UnboundedSender<StreamEvent>) {
        let (tx, events) = mpsc::unbounded_channel();
        let session = DebuggerSession {
            id: Uuid::new_v4(),
            child: None,
            stdin: None,
            events,
            readers: Vec::new(),
            reader: BoundaryReader::new(PromptMatcher::literal("(Pdb) ")),
            stderr_buf: String::new(),
            outstanding: None,
            late: Vec::new(),
            raw_output: String::new(),
            initial: Exchange::default(),
            alive: true,
            terminated: false,
            steps: 0,
            quit_command: "quit".into(),
            shutdown_timeout: Duration::from_secs(1),
        };
        (session, tx)
    }

    fn stdout(text: &str) -> StreamEvent {
        StreamEvent::Data(Stream::Stdout, text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_extra_prompt_cycle_is_kept_as_late_output() {
        let (mut session, tx) = detached_session();
        tx.send(stdout("one\n(Pdb) ")).unwrap();
        tx.send(stdout("two\n(Pdb) ")).unwrap();

        let first = session.read_until_boundary(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first.stdout, "one\n");
        assert!(first.late.is_empty());

        tx.send(stdout("three\n(Pdb) ")).unwrap();
        let second = session.read_until_boundary(Duration::from_millis(100)).await.unwrap();
        assert_eq!(second.stdout, "three\n");
        assert_eq!(second.late, vec!["two\n".to_string()]);
    }

    #[tokio::test]
    async fn test_retry_of_timed_out_command_only_waits() {
        let (mut session, tx) = detached_session();
        session.outstanding = Some("slow".into());
        tx.send(stdout("slow-done\n(Pdb) ")).unwrap();

        let out = session
            .send_and_await("slow", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(out.stdout, "slow-done\n");
        assert_eq!(session.steps(), 1);
        assert!(session.outstanding.is_none());
    }

    #[tokio::test]
    async fn test_new_command_is_held_until_stale_reply_arrives() {
        let (mut session, _tx) = detached_session();
        session.outstanding = Some("slow".into());

        let err = session
            .send_and_await("p x", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert_eq!(session.outstanding.as_deref(), Some("slow"));
        assert_eq!(session.steps(), 0);
    }
}
