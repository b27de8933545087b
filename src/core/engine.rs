//! 会话运行时：命令/状态/事件三通道
//!
//! 消费调用方命令（Submit/Cancel/Reset/Quit），把轮次派发到子任务上执行，
//! 使 Cancel 在轮次挂起（等待审批）期间仍然可达；轮次边界投影 DisplayState，
//! 过程事件经 TurnEvent 通道直达调用方。轮次进行中收到的 Submit 立即以
//! TurnInProgress 拒绝，不做排队，也不改动会话状态。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalGate, ToolProposal};
use crate::config::AppConfig;
use crate::core::{ChatError, DisplayState, SessionPhase};
use crate::llm::ModelClient;
use crate::orchestrator::{run_turn, Session, TurnContext, TurnEvent, TurnOutcome};
use crate::retrieval::{QueryScope, RetrievalClient};

/// 从调用方发往运行时的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交用户输入，触发一轮对话
    Submit(String),
    /// 取消当前轮次（含挂起等待审批的轮次）
    Cancel,
    /// 丢弃历史与日志，开始新会话序列
    Reset,
    /// 退出
    Quit,
}

/// 预构建的网关组件：模型、检索、审批门，可多会话共享
#[derive(Clone)]
pub struct ChatComponents {
    pub model: Arc<dyn ModelClient>,
    pub retrieval: Arc<dyn RetrievalClient>,
    pub gate: Arc<ApprovalGate>,
}

/// 创建会话运行时：返回命令发送端、状态接收端、事件接收端
///
/// 后台任务消费命令并驱动轮次；会话随任务退出（Quit 或命令端关闭）丢弃。
pub fn create_session(
    components: ChatComponents,
    cfg: &AppConfig,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<DisplayState>,
    mpsc::UnboundedReceiver<TurnEvent>,
) {
    let retrieval_enabled = cfg.retrieval.enabled;
    let top_k = cfg.retrieval.top_k;
    let tools_enabled = cfg.llm.tools_enabled;

    let mut session = Session::new();
    if let Some(project_id) = cfg.retrieval.project_id.clone() {
        session = session.with_scope(QueryScope::project(project_id));
    }
    let session = Arc::new(Mutex::new(session));

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(DisplayState::default());
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TurnEvent>();
    // 轮次子任务先发到内部通道，运行时在转发前按事件投影阶段
    let (turn_event_tx, mut turn_event_rx) = mpsc::unbounded_channel::<TurnEvent>();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Result<TurnOutcome, ChatError>>();

    tokio::spawn(async move {
        // 当前轮次的取消令牌；Some 即单轮进行中
        let mut current: Option<CancellationToken> = None;
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => match cmd {
                    Command::Submit(input) => {
                        if current.is_some() {
                            let _ = event_tx.send(TurnEvent::Error {
                                text: ChatError::TurnInProgress.to_string(),
                            });
                            continue;
                        }
                        let token = CancellationToken::new();
                        current = Some(token.clone());
                        {
                            let s = session.lock().await;
                            let _ = state_tx.send(DisplayState::project(
                                &s,
                                SessionPhase::Thinking,
                                true,
                                None,
                            ));
                        }

                        let session = session.clone();
                        let model = components.model.clone();
                        let retrieval = components.retrieval.clone();
                        let gate = components.gate.clone();
                        let event_tx = turn_event_tx.clone();
                        let done_tx = done_tx.clone();
                        tokio::spawn(async move {
                            let result = {
                                let mut s = session.lock().await;
                                let ctx = TurnContext {
                                    model: &model,
                                    retrieval: &retrieval,
                                    gate: &gate,
                                    cancel_token: token,
                                    event_tx: Some(&event_tx),
                                    retrieval_enabled,
                                    top_k,
                                    tools_enabled,
                                };
                                run_turn(&ctx, &mut s, &input).await
                            };
                            let _ = done_tx.send(result);
                        });
                    }
                    Command::Cancel => {
                        if let Some(token) = &current {
                            token.cancel();
                        }
                    }
                    Command::Reset => {
                        if current.is_some() {
                            let _ = event_tx.send(TurnEvent::Error {
                                text: "Turn in progress, cancel before reset".to_string(),
                            });
                        } else {
                            let mut s = session.lock().await;
                            s.reset();
                            let _ = state_tx.send(DisplayState::project(
                                &s,
                                SessionPhase::Idle,
                                false,
                                None,
                            ));
                        }
                    }
                    Command::Quit => {
                        if let Some(token) = &current {
                            token.cancel();
                        }
                        break;
                    }
                },
                Some(ev) = turn_event_rx.recv() => {
                    // 会话锁在轮次子任务手里，阶段只能按事件增量投影
                    match &ev {
                        TurnEvent::ProposalPending { tool, args, proposal_id } => {
                            let proposal = ToolProposal {
                                tool: tool.clone(),
                                args: args.clone(),
                                proposal_id: proposal_id.clone(),
                                created_at: chrono::Utc::now(),
                            };
                            state_tx.send_modify(|s| {
                                s.phase = SessionPhase::AwaitingApproval;
                                s.pending_proposal = Some(proposal);
                            });
                        }
                        TurnEvent::ToolApproved { .. } => {
                            state_tx.send_modify(|s| {
                                s.phase = SessionPhase::Thinking;
                                s.pending_proposal = None;
                            });
                        }
                        _ => {}
                    }
                    let _ = event_tx.send(ev);
                }
                Some(result) = done_rx.recv() => {
                    current = None;
                    let s = session.lock().await;
                    match result {
                        Ok(outcome) => {
                            let _ = state_tx.send(DisplayState::project(
                                &s,
                                SessionPhase::Idle,
                                false,
                                None,
                            ));
                            // 对话保存副作用：最终回复写入检索，fire-and-forget
                            if retrieval_enabled && components.retrieval.enabled() {
                                let retrieval = components.retrieval.clone();
                                let source_id = format!("{}_turn_{}", s.id, s.history.len());
                                let mut metadata = HashMap::new();
                                if let Some(project_id) =
                                    s.scope.as_ref().and_then(|sc| sc.project_id.clone())
                                {
                                    metadata.insert("project_id".to_string(), project_id);
                                }
                                let response = outcome.response;
                                tokio::spawn(async move {
                                    if let Err(e) =
                                        retrieval.ingest(&response, &source_id, metadata).await
                                    {
                                        tracing::debug!(error = %e, "Conversation ingest failed");
                                    }
                                });
                            }
                        }
                        Err(ChatError::Cancelled) => {
                            let _ = state_tx.send(DisplayState::project(
                                &s,
                                SessionPhase::Idle,
                                false,
                                None,
                            ));
                        }
                        Err(e) => {
                            let _ = state_tx.send(DisplayState::project(
                                &s,
                                SessionPhase::Error,
                                false,
                                Some(e.to_string()),
                            ));
                        }
                    }
                }
                else => break, // 两端都已关闭
            }
        }
    });

    (cmd_tx, state_rx, event_rx)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::approval::{ApprovalAuthority, ApprovalStatus, AutoApproveAuthority};
    use crate::llm::{MockModelClient, ModelResponse, ScriptedModelClient};
    use crate::retrieval::NoopRetrieval;

    /// 前几拍 pending，之后批准
    struct SlowApproveAuthority {
        pending_polls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApprovalAuthority for SlowApproveAuthority {
        async fn status(&self, _proposal_id: &str) -> Result<ApprovalStatus, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.pending_polls {
                Ok(ApprovalStatus::Pending)
            } else {
                Ok(ApprovalStatus::Approved {
                    token: "tok".to_string(),
                })
            }
        }
    }

    fn components() -> ChatComponents {
        ChatComponents {
            model: Arc::new(MockModelClient),
            retrieval: Arc::new(NoopRetrieval),
            gate: Arc::new(ApprovalGate::new(
                Arc::new(AutoApproveAuthority),
                Duration::from_millis(10),
                Duration::from_millis(500),
            )),
        }
    }

    #[tokio::test]
    async fn submit_round_trip_reaches_idle_with_two_messages() {
        let cfg = AppConfig::default();
        let (cmd_tx, mut state_rx, _event_rx) = create_session(components(), &cfg);

        cmd_tx.send(Command::Submit("hello".to_string())).unwrap();

        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state_rx.changed().await.unwrap();
                let state = state_rx.borrow().clone();
                if state.phase == SessionPhase::Idle && state.history.len() == 2 {
                    return state;
                }
            }
        })
        .await
        .expect("turn should complete");

        assert!(!reached.input_locked);
        assert!(reached.history[1].content.contains("hello"));
    }

    #[tokio::test]
    async fn awaiting_approval_phase_is_projected_while_suspended() {
        let components = ChatComponents {
            model: Arc::new(ScriptedModelClient::new(vec![
                ModelResponse::Proposal(ToolProposal::new(
                    "shell",
                    serde_json::json!({"command": "ls"}),
                )),
                ModelResponse::Final {
                    content: "done".to_string(),
                },
            ])),
            retrieval: Arc::new(NoopRetrieval),
            gate: Arc::new(ApprovalGate::new(
                Arc::new(SlowApproveAuthority {
                    pending_polls: 4,
                    calls: AtomicUsize::new(0),
                }),
                Duration::from_millis(10),
                Duration::from_millis(500),
            )),
        };
        let cfg = AppConfig::default();
        let (cmd_tx, mut state_rx, _event_rx) = create_session(components, &cfg);

        cmd_tx.send(Command::Submit("run ls".to_string())).unwrap();

        // 挂起等待审批期间，阶段与未决提案都应出现在投影里
        let suspended = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state_rx.changed().await.unwrap();
                let state = state_rx.borrow().clone();
                if state.phase == SessionPhase::AwaitingApproval {
                    return state;
                }
            }
        })
        .await
        .expect("should project AwaitingApproval while polling");
        let pending = suspended.pending_proposal.expect("proposal in projection");
        assert_eq!(pending.tool, "shell");

        // 批准续写后回到 Idle，未决提案清空
        let finished = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state_rx.changed().await.unwrap();
                let state = state_rx.borrow().clone();
                if state.phase == SessionPhase::Idle && state.history.len() == 2 {
                    return state;
                }
            }
        })
        .await
        .expect("turn should complete after approval");
        assert!(finished.pending_proposal.is_none());
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let cfg = AppConfig::default();
        let (cmd_tx, mut state_rx, _event_rx) = create_session(components(), &cfg);

        cmd_tx.send(Command::Submit("hello".to_string())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state_rx.changed().await.unwrap();
                let state = state_rx.borrow().clone();
                if state.phase == SessionPhase::Idle && !state.history.is_empty() {
                    break;
                }
            }
        })
        .await
        .expect("turn should complete");

        cmd_tx.send(Command::Reset).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                state_rx.changed().await.unwrap();
                if state_rx.borrow().history.is_empty() {
                    break;
                }
            }
        })
        .await
        .expect("reset should clear history");
    }
}
