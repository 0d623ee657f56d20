//! debugloop - 由 LLM 驱动的 pdb 调试会话
//!
//! 入口：加载配置、初始化日志、启动调试循环，输出总结或 JSON 结果。
//! 退出码：DONE 为 0，FAILED 或启动前错误为 1。

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use debugloop::chain::{ChainEvent, ChainOutcome, ChainSettings, DebugChain, SummaryStatus, TaskDescriptor};
use debugloop::config::load_config;
use debugloop::core::SessionSupervisor;
use debugloop::observability;
use debugloop::oracle::OpenAiOracle;
use debugloop::session::{DebuggerLauncher, TargetDescriptor};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "debugloop",
    version,
    about = "Let an LLM drive pdb on a Python script until it can answer a task"
)]
struct Cli {
    /// Python script to debug.
    target: PathBuf,
    /// Natural-language debugging task.
    #[arg(short, long)]
    task: String,
    /// Extra config file layered over config/default.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Maximum number of debugger commands.
    #[arg(long)]
    max_steps: Option<usize>,
    /// Oracle model id.
    #[arg(long)]
    model: Option<String>,
    /// Per-command debugger timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Print the full outcome as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// Arguments passed to the target script.
    #[arg(last = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    if let Some(n) = cli.max_steps {
        cfg.chain.max_steps = n;
    }
    if let Some(model) = cli.model.clone() {
        cfg.oracle.model = model;
    }
    if let Some(secs) = cli.timeout {
        cfg.session.command_timeout_secs = secs;
    }
    cfg.validate().context("Invalid configuration")?;

    observability::init();
    tracing::debug!(?cfg, "configuration loaded");

    let launcher =
        DebuggerLauncher::new(cfg.session.clone()).context("Failed to build debugger launcher")?;
    let oracle = OpenAiOracle::from_config(&cfg).context("Failed to build oracle client")?;
    let supervisor = SessionSupervisor::new();
    supervisor.install_ctrl_c();

    let target = TargetDescriptor::new(cli.target).with_args(cli.args);
    let task = TaskDescriptor::new(cli.task, target, cfg.chain.max_steps);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_progress(&ev);
        }
    });

    let outcome = {
        let chain = DebugChain::new(&launcher, &oracle, ChainSettings::from_config(&cfg.session))
            .with_cancel_token(supervisor.cancel_token())
            .with_event_tx(&event_tx);
        chain.run(&task).await
    };
    drop(event_tx);
    let _ = progress.await;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
        println!("{json}");
    } else {
        print_outcome(&outcome);
    }
    Ok(outcome.is_done())
}

/// 进度写到 stderr
fn print_progress(ev: &ChainEvent) {
    match ev {
        ChainEvent::Command { step, command } => eprintln!("[{step}] > {command}"),
        ChainEvent::Observation { preview, .. } if !preview.is_empty() => {
            for line in preview.lines() {
                eprintln!("    {line}");
            }
        }
        ChainEvent::ContextUnavailable { step, reason } => {
            eprintln!("[{step}] context unavailable: {reason}")
        }
        _ => {}
    }
}

fn print_outcome(outcome: &ChainOutcome) {
    if let Some(report) = &outcome.failure {
        eprintln!(
            "FAILED at step {} [{:?}]: {}",
            report.step, report.kind, report.message
        );
        if !report.last_output.trim().is_empty() {
            eprintln!("--- last output ---\n{}", report.last_output.trim_end());
        }
        return;
    }
    match &outcome.summary {
        SummaryStatus::Available(text) => println!("{text}"),
        SummaryStatus::Unavailable(reason) => {
            println!("Task complete; summary unavailable ({reason}).")
        }
        SummaryStatus::NotRequested => println!("Task complete."),
    }
}
