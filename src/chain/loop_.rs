//! 调试循环主流程
//!
//! STARTING（启动会话、消费横幅、初始上下文转储）-> RUNNING（问 Oracle -> 派发命令 -> 记录输出）
//! -> COMPLETING（请求总结）-> DONE；任何致命错误旁路进入 FAILED。
//! 会话一旦启动成功，无论以何种方式退出都恰好 terminate 一次。
//! 可选 event_tx：向 CLI 或前端推送 Phase / Command / Observation 等事件。

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chain::prompt::{decision_messages, summary_messages, DUMP_ALIAS};
use crate::chain::{ChainEvent, TaskDescriptor, Transcript};
use crate::config::SessionSection;
use crate::core::{
    FailureReport, LoopError, LoopPhase, OracleError, RecoveryAction, RecoveryEngine,
    SessionError,
};
use crate::oracle::{parse_action, parse_summary, Action, OracleClient};
use crate::probe::{parse_context_output, ContextState};
use crate::session::{DebugSession, Exchange, SessionLauncher};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 循环用到的会话参数
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub command_timeout: Duration,
    pub context_timeout: Duration,
    /// `dump` 与初始转储实际发送的命令
    pub context_command: String,
}

impl ChainSettings {
    pub fn from_config(cfg: &SessionSection) -> Self {
        Self {
            command_timeout: cfg.command_timeout(),
            context_timeout: cfg.context_timeout(),
            context_command: cfg.context_command.clone(),
        }
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self::from_config(&SessionSection::default())
    }
}

/// 任务结束后的总结状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum SummaryStatus {
    /// 未走到 COMPLETING
    NotRequested,
    Available(String),
    /// 总结请求失败；任务仍视为完成
    Unavailable(String),
}

/// 本次运行消耗的 token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OracleUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 一次调试循环的最终结果
#[derive(Debug, Clone, Serialize)]
pub struct ChainOutcome {
    /// 启动失败时为 None
    pub session_id: Option<Uuid>,
    /// DONE 或 FAILED
    pub phase: LoopPhase,
    pub transcript: Transcript,
    pub summary: SummaryStatus,
    pub failure: Option<FailureReport>,
    pub usage: OracleUsage,
}

impl ChainOutcome {
    pub fn is_done(&self) -> bool {
        self.phase == LoopPhase::Done
    }

    pub fn summary_text(&self) -> Option<&str> {
        match &self.summary {
            SummaryStatus::Available(text) => Some(text),
            _ => None,
        }
    }
}

/// 会话往返方式：计步的 send_and_await 或不计步的 query
#[derive(Clone, Copy)]
enum Channel {
    Step,
    Query,
}

pub struct DebugChain<'a> {
    launcher: &'a dyn SessionLauncher,
    oracle: &'a dyn OracleClient,
    recovery: RecoveryEngine,
    settings: ChainSettings,
    cancel_token: CancellationToken,
    event_tx: Option<&'a mpsc::UnboundedSender<ChainEvent>>,
}

impl<'a> DebugChain<'a> {
    pub fn new(
        launcher: &'a dyn SessionLauncher,
        oracle: &'a dyn OracleClient,
        settings: ChainSettings,
    ) -> Self {
        Self {
            launcher,
            oracle,
            recovery: RecoveryEngine::new(),
            settings,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// 设置取消令牌（通常来自 SessionSupervisor）
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<ChainEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, ev: ChainEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn advance(&self, phase: &mut LoopPhase, next: LoopPhase) {
        debug_assert!(
            phase.can_transition_to(next),
            "illegal phase transition {phase} -> {next}"
        );
        info!(from = %phase, to = %next, "Debug chain phase transition");
        *phase = next;
        self.emit(ChainEvent::Phase { phase: next });
    }

    /// 执行一次完整的调试循环；总是返回结果，失败信息在 `failure` 中
    pub async fn run(&self, task: &TaskDescriptor) -> ChainOutcome {
        let usage_before = self.oracle.token_usage();
        let mut phase = LoopPhase::Starting;
        let mut transcript = Transcript::new();
        self.emit(ChainEvent::Phase { phase });
        info!(script = %task.target, max_steps = task.max_steps, "Debug chain starting");

        let (session_id, result) = match self.launcher.launch(&task.target).await {
            Ok(mut session) => {
                let id = session.id();
                let result = self
                    .drive(&mut *session, task, &mut transcript, &mut phase)
                    .await;
                session.terminate().await;
                (Some(id), result)
            }
            Err(e) => (None, Err(LoopError::from(e))),
        };

        let usage = self.usage_since(usage_before);
        match result {
            Ok(summary) => {
                self.advance(&mut phase, LoopPhase::Done);
                info!(steps = transcript.len(), "Debug chain done");
                ChainOutcome {
                    session_id,
                    phase,
                    transcript,
                    summary,
                    failure: None,
                    usage,
                }
            }
            Err(err) => {
                let step = failure_step(phase, &err, transcript.len());
                self.advance(&mut phase, LoopPhase::Failed);
                let report = FailureReport::new(&err, step, last_output(&err, &transcript));
                error!(kind = ?report.kind, step = report.step, error = %err, "Debug chain failed");
                self.emit(ChainEvent::Failed {
                    kind: report.kind,
                    message: report.message.clone(),
                });
                ChainOutcome {
                    session_id,
                    phase,
                    transcript,
                    summary: SummaryStatus::NotRequested,
                    failure: Some(report),
                    usage,
                }
            }
        }
    }

    async fn drive(
        &self,
        session: &mut dyn DebugSession,
        task: &TaskDescriptor,
        transcript: &mut Transcript,
        phase: &mut LoopPhase,
    ) -> Result<SummaryStatus, LoopError> {
        info!(session_id = %session.id(), "Debugger session started");
        transcript.initial_output = session.initial_output().clone();
        let initial = self
            .exchange(
                session,
                &self.settings.context_command,
                self.settings.context_timeout,
                Channel::Query,
            )
            .await?;
        transcript.initial_context = self.context_state(0, &initial.stdout)?;
        self.advance(phase, LoopPhase::Running);

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(LoopError::Cancelled);
            }
            if transcript.len() >= task.max_steps {
                return Err(LoopError::StepBudgetExhausted);
            }
            self.emit(ChainEvent::StepUpdate {
                step: transcript.len(),
                max_steps: task.max_steps,
            });

            let (reply, action) = self.decide(task, transcript).await?;
            match action {
                Action::TaskComplete => break,
                Action::GiveUp => return Err(LoopError::OracleGaveUp),
                Action::RawCommand(command) => {
                    self.dispatch(session, transcript, &reply, &command).await?;
                }
                Action::SummaryText(_) => {
                    return Err(OracleError::Parse("summary text where a command was expected".into()).into());
                }
            }
        }

        self.advance(phase, LoopPhase::Completing);
        self.summarize(task, transcript).await
    }

    /// 询问 Oracle 下一步；传输类错误与解析错误各自最多重试一次
    async fn decide(
        &self,
        task: &TaskDescriptor,
        transcript: &Transcript,
    ) -> Result<(String, Action), LoopError> {
        let mut transport_retries = 0u8;
        let mut parse_retries = 0u8;
        let mut clarification: Option<String> = None;

        loop {
            let messages = decision_messages(task, transcript, clarification.as_deref());
            let attempt = match self.cancellable(self.oracle.complete(&messages)).await {
                Ok(reply) => match parse_action(&reply) {
                    Ok(action) => Ok((reply, action)),
                    Err(e) => Err(LoopError::from(e)),
                },
                Err(e) => Err(e),
            };
            let err = match attempt {
                Ok((reply, action)) => {
                    debug!(?action, "Oracle decision");
                    return Ok((reply, action));
                }
                Err(e) => e,
            };

            let retries = if matches!(err, LoopError::Oracle(OracleError::Parse(_))) {
                &mut parse_retries
            } else {
                &mut transport_retries
            };
            match self.recovery.handle(&err, *retries) {
                RecoveryAction::Retry => {
                    *retries += 1;
                    warn!(error = %err, "Oracle request failed, retrying");
                    self.emit(ChainEvent::Recovery {
                        action: "Retry".to_string(),
                        detail: err.to_string(),
                    });
                }
                RecoveryAction::RetryWithPrompt(note) => {
                    *retries += 1;
                    warn!(error = %err, "Oracle reply unparseable, asking again with clarification");
                    self.emit(ChainEvent::Recovery {
                        action: "RetryWithPrompt".to_string(),
                        detail: err.to_string(),
                    });
                    clarification = Some(note);
                }
                RecoveryAction::Continue | RecoveryAction::Abort => return Err(err),
            }
        }
    }

    /// 派发一条命令并追加转录；`dump` 展开为上下文转储命令
    async fn dispatch(
        &self,
        session: &mut dyn DebugSession,
        transcript: &mut Transcript,
        reply: &str,
        command: &str,
    ) -> Result<(), LoopError> {
        let is_dump = command.trim().eq_ignore_ascii_case(DUMP_ALIAS);
        let (wire, timeout) = if is_dump {
            (self.settings.context_command.as_str(), self.settings.context_timeout)
        } else {
            (command, self.settings.command_timeout)
        };
        let step = transcript.len() + 1;
        info!(step, command = %wire, "Dispatching debugger command");
        self.emit(ChainEvent::Command {
            step,
            command: wire.to_string(),
        });

        let output = self.exchange(session, wire, timeout, Channel::Step).await?;
        let context = if is_dump {
            self.context_state(step, &output.stdout)?
        } else {
            ContextState::NotRequested
        };
        self.emit(ChainEvent::Observation {
            step,
            preview: preview(&output),
        });
        transcript.push(wire, reply, output, context);
        Ok(())
    }

    /// 一次会话往返；超时后对同一命令再等待一次（会话不会重复写入）
    async fn exchange(
        &self,
        session: &mut dyn DebugSession,
        command: &str,
        timeout: Duration,
        channel: Channel,
    ) -> Result<Exchange, LoopError> {
        let mut retries = 0u8;
        loop {
            let attempt = match channel {
                Channel::Step => {
                    self.cancellable(session.send_and_await(command, timeout))
                        .await
                }
                Channel::Query => self.cancellable(session.query(command, timeout)).await,
            };
            let err = match attempt {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };
            match self.recovery.handle(&err, retries) {
                RecoveryAction::Retry => {
                    retries += 1;
                    warn!(command, error = %err, "Debugger command timed out, waiting once more");
                    self.emit(ChainEvent::Recovery {
                        action: "Retry".to_string(),
                        detail: err.to_string(),
                    });
                }
                _ => return Err(err),
            }
        }
    }

    /// 解析转储输出；探针错误可恢复，记为 Unavailable
    fn context_state(&self, step: usize, stdout: &str) -> Result<ContextState, LoopError> {
        let err = match parse_context_output(stdout) {
            Ok(snapshot) => return Ok(ContextState::Available { snapshot }),
            Err(e) => e,
        };
        match self.recovery.handle(&err, 0) {
            RecoveryAction::Continue => {
                warn!(step, error = %err, "Context unavailable");
                self.emit(ChainEvent::ContextUnavailable {
                    step,
                    reason: err.to_string(),
                });
                Ok(ContextState::Unavailable {
                    reason: err.to_string(),
                    raw: stdout.to_string(),
                })
            }
            _ => Err(err),
        }
    }

    /// 请求最终总结；失败只影响总结本身，不影响 DONE
    async fn summarize(
        &self,
        task: &TaskDescriptor,
        transcript: &Transcript,
    ) -> Result<SummaryStatus, LoopError> {
        let messages = summary_messages(task, transcript);
        let mut retries = 0u8;
        loop {
            let attempt = match self.cancellable(self.oracle.complete(&messages)).await {
                Ok(reply) => parse_summary(&reply).map_err(LoopError::from),
                Err(e) => Err(e),
            };
            let err = match attempt {
                Ok(Action::SummaryText(text)) => {
                    self.emit(ChainEvent::Summary { text: text.clone() });
                    return Ok(SummaryStatus::Available(text));
                }
                Ok(other) => {
                    return Ok(SummaryStatus::Unavailable(format!(
                        "unexpected summary reply: {other:?}"
                    )));
                }
                Err(LoopError::Cancelled) => return Err(LoopError::Cancelled),
                Err(e) => e,
            };
            match self.recovery.handle(&err, retries) {
                RecoveryAction::Retry | RecoveryAction::RetryWithPrompt(_) => {
                    retries += 1;
                    warn!(error = %err, "Summary request failed, retrying");
                }
                _ => {
                    warn!(error = %err, "Summary unavailable");
                    return Ok(SummaryStatus::Unavailable(err.to_string()));
                }
            }
        }
    }

    /// 等待 fut，期间取消则返回 Cancelled
    async fn cancellable<T, E>(
        &self,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, LoopError>
    where
        E: Into<LoopError>,
    {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(LoopError::Cancelled),
            res = fut => res.map_err(Into::into),
        }
    }

    fn usage_since(&self, before: (u64, u64, u64)) -> OracleUsage {
        let (p, c, t) = self.oracle.token_usage();
        OracleUsage {
            prompt_tokens: p.saturating_sub(before.0),
            completion_tokens: c.saturating_sub(before.1),
            total_tokens: t.saturating_sub(before.2),
        }
    }
}

/// 失败报告中的步号：启动阶段为 0，RUNNING 中为正在尝试的那一步，预算耗尽与总结阶段为已完成的步数
fn failure_step(phase: LoopPhase, err: &LoopError, completed: usize) -> usize {
    match phase {
        LoopPhase::Starting => 0,
        LoopPhase::Running if !matches!(err, LoopError::StepBudgetExhausted) => completed + 1,
        _ => completed,
    }
}

/// 失败报告中的原始输出：超时时取部分输出，否则取最近一次捕获
fn last_output(err: &LoopError, transcript: &Transcript) -> String {
    if let LoopError::Session(SessionError::Timeout { partial, .. }) = err {
        return partial.clone();
    }
    let latest = transcript.latest_output();
    let mut out = latest.stdout.clone();
    if !latest.stderr.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&latest.stderr);
    }
    out
}

fn preview(output: &Exchange) -> String {
    let text = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        format!("{}\n{}", output.stdout.trim(), output.stderr.trim())
    };
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        let head: String = text.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text
    }
}
