//! Apiary - 对话编排器 CLI
//!
//! 入口：初始化日志、加载配置、按配置装配模型/检索/审批网关
//! （端点未配置时回落到 Mock / 内存索引 / 自动批准），随后进入
//! 行式 REPL：普通行提交轮次，/cancel /reset /quit 为控制命令。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use apiary::approval::{ApprovalGate, AutoApproveAuthority, HttpApprovalAuthority};
use apiary::config::{load_config, AppConfig};
use apiary::core::{create_session, ChatComponents, Command};
use apiary::llm::{HttpModelClient, MockModelClient, ModelClient};
use apiary::orchestrator::TurnEvent;
use apiary::retrieval::{HttpRetrievalClient, KeywordRetrieval, RetrievalClient};

fn build_model(cfg: &AppConfig) -> Arc<dyn ModelClient> {
    match cfg.llm.base_url.as_deref() {
        Some(base) => {
            let system_prompt = ["config/prompts/system.txt", "../config/prompts/system.txt"]
                .into_iter()
                .find_map(|p| std::fs::read_to_string(p).ok())
                .unwrap_or_else(|| {
                    "You are Apiary, a helpful AI assistant.".to_string()
                });
            tracing::info!(model = %cfg.llm.model, "Using HTTP model endpoint");
            Arc::new(
                HttpModelClient::new(
                    base,
                    &cfg.llm.model,
                    system_prompt,
                    cfg.llm.request_timeout_secs,
                )
                .with_sampling(cfg.llm.temperature, cfg.llm.max_tokens),
            )
        }
        None => {
            tracing::warn!("No model endpoint configured, using Mock");
            Arc::new(MockModelClient)
        }
    }
}

fn build_retrieval(cfg: &AppConfig) -> Arc<dyn RetrievalClient> {
    match cfg.retrieval.base_url.as_deref() {
        Some(base) => Arc::new(HttpRetrievalClient::new(
            base,
            cfg.retrieval.request_timeout_secs,
        )),
        None => {
            tracing::info!("No retrieval endpoint configured, using in-memory keyword index");
            Arc::new(KeywordRetrieval::default())
        }
    }
}

fn build_gate(cfg: &AppConfig) -> Arc<ApprovalGate> {
    let authority: Arc<dyn apiary::approval::ApprovalAuthority> =
        match cfg.approval.base_url.as_deref() {
            Some(base) => Arc::new(HttpApprovalAuthority::new(
                base,
                cfg.approval.request_timeout_secs,
            )),
            None => {
                tracing::warn!("No approval endpoint configured, tool proposals auto-approve");
                Arc::new(AutoApproveAuthority)
            }
        };
    Arc::new(ApprovalGate::new(
        authority,
        Duration::from_secs(cfg.approval.poll_interval_secs),
        Duration::from_secs(cfg.approval.deadline_secs),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    apiary::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let model = build_model(&cfg);
    if let Ok(models) = model.list_models().await {
        if !models.is_empty() {
            tracing::info!(available = ?models, "Models at endpoint");
        }
    }

    let components = ChatComponents {
        model,
        retrieval: build_retrieval(&cfg),
        gate: build_gate(&cfg),
    };

    let (cmd_tx, _state_rx, mut event_rx) = create_session(components, &cfg);

    // 事件打印：块状流式回复按行签名输出，其余事件单行
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                TurnEvent::MessageChunk { text } => {
                    print!("{text}");
                    let _ = std::io::Write::flush(&mut std::io::stdout());
                }
                TurnEvent::MessageDone => println!(),
                TurnEvent::Thinking => println!("[thinking...]"),
                TurnEvent::GroundingContext { count } => {
                    println!("[grounded on {count} snippets]")
                }
                TurnEvent::RetrievalSkipped { reason } => {
                    println!("[retrieval skipped: {reason}]")
                }
                TurnEvent::ProposalPending {
                    tool, proposal_id, ..
                } => println!("[tool {tool} pending approval, proposal {proposal_id}]"),
                TurnEvent::ToolApproved { tool } => println!("[tool {tool} approved]"),
                TurnEvent::ToolRejected { tool } => println!("[tool {tool} rejected]"),
                TurnEvent::ApprovalTimedOut { tool } => {
                    println!("[tool {tool} approval timed out]")
                }
                TurnEvent::ToolResult { tool, preview } => {
                    println!("[{tool}] {preview}")
                }
                TurnEvent::Error { text } => println!("[error] {text}"),
            }
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    println!("Apiary ready. /cancel /reset /quit");

    while let Some(line) = lines.next_line().await.context("stdin read failed")? {
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            "/quit" => {
                let _ = cmd_tx.send(Command::Quit);
                break;
            }
            "/cancel" => {
                let _ = cmd_tx.send(Command::Cancel);
            }
            "/reset" => {
                let _ = cmd_tx.send(Command::Reset);
            }
            _ => {
                cmd_tx
                    .send(Command::Submit(line))
                    .context("session runtime gone")?;
            }
        }
    }

    Ok(())
}
