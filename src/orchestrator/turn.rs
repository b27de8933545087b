//! 单轮状态机
//!
//! 用户输入 -> 追加 user 消息 -> 尽力检索接地 -> 模型完成 ->
//! 最终回答则追加并返回；工具提案则登记审批门并挂起，批准后续写，
//! 续写结果按同样分支处理（可串行链出下一个提案），拒绝/超时/取消
//! 则以相应终局结束。历史只在本函数内按执行顺序追加。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalDecision, ApprovalGate};
use crate::core::ChatError;
use crate::llm::{ModelClient, ModelResponse};
use crate::memory::{Message, TurnLogEntry, TurnStatus};
use crate::orchestrator::{Session, TurnEvent};
use crate::retrieval::{RetrievalClient, Snippet};

/// 单轮内最大串行提案数，防止模型无限链工具
const MAX_TOOL_ROUNDS: usize = 8;
/// 流式回复时每段字符数（模拟打字效果）
const CHUNK_CHARS: usize = 6;
/// 工具结果预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 200;

/// 单轮执行结果：最终回复与当前对话历史快照
#[derive(Debug)]
pub struct TurnOutcome {
    pub response: String,
    pub messages: Vec<Message>,
}

/// 单轮依赖（网关、审批门、取消令牌与事件通道）
pub struct TurnContext<'a> {
    pub model: &'a Arc<dyn ModelClient>,
    pub retrieval: &'a Arc<dyn RetrievalClient>,
    pub gate: &'a ApprovalGate,
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a mpsc::UnboundedSender<TurnEvent>>,
    /// 本会话是否启用检索接地
    pub retrieval_enabled: bool,
    pub top_k: usize,
    pub tools_enabled: bool,
}

fn send_event(tx: &Option<&mpsc::UnboundedSender<TurnEvent>>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let short: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{short}...")
    } else {
        short
    }
}

/// 执行一轮对话
///
/// 会话已有轮次进行中时立即拒绝（历史是单一线性序列，禁止交错）；
/// 任何出口都会释放单轮守卫。模型不可用时 user 消息保留在历史中，
/// 可直接重新提交。
pub async fn run_turn(
    ctx: &TurnContext<'_>,
    session: &mut Session,
    user_input: &str,
) -> Result<TurnOutcome, ChatError> {
    if user_input.trim().is_empty() {
        return Err(ChatError::EmptyInput);
    }
    if session.turn_active {
        return Err(ChatError::TurnInProgress);
    }

    session.turn_active = true;
    let result = turn_body(ctx, session, user_input).await;
    session.turn_active = false;
    result
}

async fn turn_body(
    ctx: &TurnContext<'_>,
    session: &mut Session,
    user_input: &str,
) -> Result<TurnOutcome, ChatError> {
    session.history.push(Message::user(user_input));

    let context = gather_context(ctx, session, user_input).await;

    send_event(&ctx.event_tx, TurnEvent::Thinking);
    let mut response = ctx
        .model
        .complete(session.history.messages(), &context, ctx.tools_enabled)
        .await
        .map_err(|e| {
            send_event(&ctx.event_tx, TurnEvent::Error { text: e.clone() });
            ChatError::ModelUnavailable(e)
        })?;

    let mut rounds = 0;
    loop {
        if ctx.cancel_token.is_cancelled() {
            send_event(&ctx.event_tx, TurnEvent::Error {
                text: "Cancelled by user".to_string(),
            });
            return Err(ChatError::Cancelled);
        }

        match response {
            ModelResponse::Final { content } => {
                // 空回复兜底
                let content = if content.trim().is_empty() {
                    "No response".to_string()
                } else {
                    content
                };
                let chars: Vec<char> = content.chars().collect();
                for chunk in chars.chunks(CHUNK_CHARS) {
                    send_event(&ctx.event_tx, TurnEvent::MessageChunk {
                        text: chunk.iter().collect(),
                    });
                }
                send_event(&ctx.event_tx, TurnEvent::MessageDone);

                session.history.push(Message::assistant(content.clone()));
                return Ok(TurnOutcome {
                    response: content,
                    messages: session.history.snapshot(),
                });
            }
            ModelResponse::Proposal(proposal) => {
                if session.pending_proposal.is_some() {
                    send_event(&ctx.event_tx, TurnEvent::Error {
                        text: format!("Concurrent proposal for tool {}", proposal.tool),
                    });
                    return Err(ChatError::ConcurrentProposal(proposal.tool));
                }

                rounds += 1;
                if rounds > MAX_TOOL_ROUNDS {
                    // 步数上限：以提示语收轮，不算错误
                    let notice = format!(
                        "达到单轮工具上限 ({MAX_TOOL_ROUNDS})，最后的提案 {} 未执行。",
                        proposal.tool
                    );
                    send_event(&ctx.event_tx, TurnEvent::MessageDone);
                    session.history.push(Message::assistant(notice.clone()));
                    return Ok(TurnOutcome {
                        response: notice,
                        messages: session.history.snapshot(),
                    });
                }

                session.pending_proposal = Some(proposal.clone());
                session.turn_log.push(
                    TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::PendingApproval)
                        .with_proposal_id(&proposal.proposal_id),
                );
                send_event(&ctx.event_tx, TurnEvent::ProposalPending {
                    tool: proposal.tool.clone(),
                    args: proposal.args.clone(),
                    proposal_id: proposal.proposal_id.clone(),
                });

                let handle = ctx.gate.register(&proposal, &ctx.cancel_token).await;
                let decision = ctx.gate.await_decision(handle).await;
                // 终局或取消：提案一律退役
                session.pending_proposal = None;

                match decision {
                    None => {
                        session.turn_log.push(
                            TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::Error)
                                .with_proposal_id(&proposal.proposal_id)
                                .with_output_preview("turn cancelled"),
                        );
                        send_event(&ctx.event_tx, TurnEvent::Error {
                            text: "Cancelled by user".to_string(),
                        });
                        return Err(ChatError::Cancelled);
                    }
                    Some(ApprovalDecision::Approved { token }) => {
                        session.turn_log.push(
                            TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::Dispatched)
                                .with_proposal_id(&proposal.proposal_id),
                        );
                        send_event(&ctx.event_tx, TurnEvent::ToolApproved {
                            tool: proposal.tool.clone(),
                        });

                        let continued = ctx
                            .model
                            .continue_with_tool(
                                session.history.messages(),
                                &proposal.tool,
                                &proposal.args,
                                &token,
                            )
                            .await;
                        response = match continued {
                            Ok(r) => r,
                            Err(e) => {
                                session.turn_log.push(
                                    TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::Error)
                                        .with_proposal_id(&proposal.proposal_id)
                                        .with_output_preview(preview(&e, RESULT_PREVIEW_CHARS)),
                                );
                                send_event(&ctx.event_tx, TurnEvent::Error { text: e.clone() });
                                return Err(ChatError::ModelUnavailable(e));
                            }
                        };

                        let result_preview = match &response {
                            ModelResponse::Final { content } => preview(content, RESULT_PREVIEW_CHARS),
                            ModelResponse::Proposal(next) => {
                                format!("follow-up proposal: {}", next.tool)
                            }
                        };
                        session.turn_log.push(
                            TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::Success)
                                .with_proposal_id(&proposal.proposal_id)
                                .with_output_preview(result_preview.clone()),
                        );
                        send_event(&ctx.event_tx, TurnEvent::ToolResult {
                            tool: proposal.tool.clone(),
                            preview: result_preview,
                        });
                        // 续写结果回到循环顶部，按最终回答/新提案继续
                    }
                    Some(ApprovalDecision::Rejected) => {
                        session.turn_log.push(
                            TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::Error)
                                .with_proposal_id(&proposal.proposal_id)
                                .with_output_preview("proposal rejected"),
                        );
                        send_event(&ctx.event_tx, TurnEvent::ToolRejected {
                            tool: proposal.tool.clone(),
                        });
                        return Err(ChatError::ToolRejected(proposal.tool));
                    }
                    Some(ApprovalDecision::TimedOut) => {
                        session.turn_log.push(
                            TurnLogEntry::new(&proposal.tool, proposal.args.clone(), TurnStatus::Error)
                                .with_proposal_id(&proposal.proposal_id)
                                .with_output_preview("approval timed out"),
                        );
                        send_event(&ctx.event_tx, TurnEvent::ApprovalTimedOut {
                            tool: proposal.tool.clone(),
                        });
                        return Err(ChatError::ApprovalTimeout(proposal.tool));
                    }
                }
            }
        }
    }
}

/// 接地上下文：优先选中文档，否则查询检索网关；失败以空上下文继续
async fn gather_context(
    ctx: &TurnContext<'_>,
    session: &Session,
    user_input: &str,
) -> Vec<Snippet> {
    if !ctx.retrieval_enabled || !ctx.retrieval.enabled() {
        return Vec::new();
    }
    if !session.pinned_snippets.is_empty() {
        send_event(&ctx.event_tx, TurnEvent::GroundingContext {
            count: session.pinned_snippets.len(),
        });
        return session.pinned_snippets.clone();
    }
    match ctx
        .retrieval
        .query(user_input, session.scope.as_ref(), ctx.top_k)
        .await
    {
        Ok(snippets) => {
            if !snippets.is_empty() {
                send_event(&ctx.event_tx, TurnEvent::GroundingContext {
                    count: snippets.len(),
                });
            }
            snippets
        }
        Err(e) => {
            tracing::warn!(error = %e, "Retrieval query failed, proceeding without context");
            send_event(&ctx.event_tx, TurnEvent::RetrievalSkipped { reason: e });
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::approval::AutoApproveAuthority;
    use crate::llm::{MockModelClient, ScriptedModelClient};
    use crate::retrieval::NoopRetrieval;

    fn test_gate() -> ApprovalGate {
        ApprovalGate::new(
            Arc::new(AutoApproveAuthority),
            Duration::from_millis(10),
            Duration::from_millis(500),
        )
    }

    fn ctx<'a>(
        model: &'a Arc<dyn ModelClient>,
        retrieval: &'a Arc<dyn RetrievalClient>,
        gate: &'a ApprovalGate,
    ) -> TurnContext<'a> {
        TurnContext {
            model,
            retrieval,
            gate,
            cancel_token: CancellationToken::new(),
            event_tx: None,
            retrieval_enabled: false,
            top_k: 3,
            tools_enabled: true,
        }
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_mutation() {
        let model: Arc<dyn ModelClient> = Arc::new(MockModelClient);
        let retrieval: Arc<dyn RetrievalClient> = Arc::new(NoopRetrieval);
        let gate = test_gate();
        let mut session = Session::new();

        let err = run_turn(&ctx(&model, &retrieval, &gate), &mut session, "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::EmptyInput));
        assert!(session.history.is_empty());
        assert!(!session.turn_active);
    }

    #[tokio::test]
    async fn reentrant_submission_is_rejected() {
        let model: Arc<dyn ModelClient> = Arc::new(MockModelClient);
        let retrieval: Arc<dyn RetrievalClient> = Arc::new(NoopRetrieval);
        let gate = test_gate();
        let mut session = Session::new();
        session.turn_active = true;

        let err = run_turn(&ctx(&model, &retrieval, &gate), &mut session, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::TurnInProgress));
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn final_answer_round_trip() {
        let model: Arc<dyn ModelClient> = Arc::new(MockModelClient);
        let retrieval: Arc<dyn RetrievalClient> = Arc::new(NoopRetrieval);
        let gate = test_gate();
        let mut session = Session::new();

        let outcome = run_turn(&ctx(&model, &retrieval, &gate), &mut session, "你好")
            .await
            .unwrap();

        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history.messages()[1].content, outcome.response);
        assert!(outcome.response.contains("你好"));
        assert!(!session.turn_active);
        assert!(session.turn_log.is_empty());
    }

    #[tokio::test]
    async fn model_failure_keeps_user_message() {
        // 空脚本：首次 complete 即失败
        let model: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new(vec![]));
        let retrieval: Arc<dyn RetrievalClient> = Arc::new(NoopRetrieval);
        let gate = test_gate();
        let mut session = Session::new();

        let err = run_turn(&ctx(&model, &retrieval, &gate), &mut session, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ModelUnavailable(_)));
        // user 消息保留，可重新提交
        assert_eq!(session.history.len(), 1);
        assert!(!session.turn_active);
    }

    #[tokio::test]
    async fn empty_final_content_falls_back_to_no_response() {
        let model: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::new(vec![
            ModelResponse::Final {
                content: "   ".to_string(),
            },
        ]));
        let retrieval: Arc<dyn RetrievalClient> = Arc::new(NoopRetrieval);
        let gate = test_gate();
        let mut session = Session::new();

        let outcome = run_turn(&ctx(&model, &retrieval, &gate), &mut session, "hi")
            .await
            .unwrap();
        assert_eq!(outcome.response, "No response");
    }
}
