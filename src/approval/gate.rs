//! ApprovalGate：固定间隔轮询 + 绝对截止 + 显式取消
//!
//! 登记提案后按 poll_interval 轮询审批方，读到 approved/rejected 即终局；
//! 到达 deadline 仍未终局则判 timed_out。瞬态读失败只记日志并在下一拍重试，
//! 从不当作拒绝。跟踪集是 proposal_id -> CancellationToken 的显式映射：
//! 会话被丢弃时 cancel 对应条目即停止轮询，互不影响其它会话的提案。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::approval::{ApprovalAuthority, ApprovalDecision, ToolProposal};

/// 一次登记对应的轮询句柄
#[derive(Debug)]
pub struct PollHandle {
    proposal_id: String,
    token: CancellationToken,
    registered_at: tokio::time::Instant,
}

impl PollHandle {
    pub fn proposal_id(&self) -> &str {
        &self.proposal_id
    }
}

/// 审批门：持有审批方、轮询节奏与跟踪集
pub struct ApprovalGate {
    authority: Arc<dyn ApprovalAuthority>,
    poll_interval: Duration,
    deadline: Duration,
    tracked: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl ApprovalGate {
    pub fn new(authority: Arc<dyn ApprovalAuthority>, poll_interval: Duration, deadline: Duration) -> Self {
        Self {
            authority,
            poll_interval,
            deadline,
            tracked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 登记提案：挂入跟踪集并返回轮询句柄
    ///
    /// parent 为所属轮次的取消令牌；轮次取消时该提案的轮询随之停止。
    pub async fn register(&self, proposal: &ToolProposal, parent: &CancellationToken) -> PollHandle {
        let token = parent.child_token();
        self.tracked
            .write()
            .await
            .insert(proposal.proposal_id.clone(), token.clone());
        tracing::info!(
            proposal_id = %proposal.proposal_id,
            tool = %proposal.tool,
            "Proposal registered, awaiting approval"
        );
        PollHandle {
            proposal_id: proposal.proposal_id.clone(),
            token,
            registered_at: tokio::time::Instant::now(),
        }
    }

    /// 轮询直到终局或取消；返回 None 表示被取消
    ///
    /// 无论以何种方式结束，提案都会从跟踪集移除，之后对它的轮询不复存在。
    pub async fn await_decision(&self, handle: PollHandle) -> Option<ApprovalDecision> {
        let deadline_at = handle.registered_at + self.deadline;
        let mut ticker = tokio::time::interval(self.poll_interval);

        let decision = loop {
            tokio::select! {
                _ = handle.token.cancelled() => {
                    tracing::info!(proposal_id = %handle.proposal_id, "Approval polling cancelled");
                    break None;
                }
                _ = tokio::time::sleep_until(deadline_at) => {
                    tracing::warn!(proposal_id = %handle.proposal_id, "Approval deadline elapsed");
                    break Some(ApprovalDecision::TimedOut);
                }
                _ = ticker.tick() => {
                    match self.authority.status(&handle.proposal_id).await {
                        Ok(crate::approval::ApprovalStatus::Pending) => {
                            tracing::debug!(proposal_id = %handle.proposal_id, "Approval still pending");
                        }
                        Ok(crate::approval::ApprovalStatus::Approved { token }) => {
                            break Some(ApprovalDecision::Approved { token });
                        }
                        Ok(crate::approval::ApprovalStatus::Rejected) => {
                            break Some(ApprovalDecision::Rejected);
                        }
                        Err(e) => {
                            // 瞬态失败：下一拍重试
                            tracing::debug!(proposal_id = %handle.proposal_id, error = %e, "Approval poll failed, retrying");
                        }
                    }
                }
            }
        };

        self.tracked.write().await.remove(&handle.proposal_id);
        decision
    }

    /// 取消指定提案的轮询并从跟踪集移除（幂等；不存在则为 no-op）
    pub async fn cancel(&self, proposal_id: &str) {
        if let Some(token) = self.tracked.write().await.remove(proposal_id) {
            token.cancel();
        }
    }

    pub async fn is_tracked(&self, proposal_id: &str) -> bool {
        self.tracked.read().await.contains_key(proposal_id)
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracked.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::approval::ApprovalStatus;

    /// 前 N 次返回 pending，之后终局；记录被轮询次数
    struct ScriptedAuthority {
        pending_polls: usize,
        terminal: ApprovalStatus,
        calls: AtomicUsize,
    }

    impl ScriptedAuthority {
        fn new(pending_polls: usize, terminal: ApprovalStatus) -> Self {
            Self {
                pending_polls,
                terminal,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ApprovalAuthority for ScriptedAuthority {
        async fn status(&self, _proposal_id: &str) -> Result<ApprovalStatus, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.pending_polls {
                Ok(ApprovalStatus::Pending)
            } else {
                Ok(self.terminal.clone())
            }
        }
    }

    /// 总是 pending
    struct AlwaysPending {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApprovalAuthority for AlwaysPending {
        async fn status(&self, _proposal_id: &str) -> Result<ApprovalStatus, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ApprovalStatus::Pending)
        }
    }

    /// 前 N 次读失败（瞬态），之后批准
    struct FlakyAuthority {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ApprovalAuthority for FlakyAuthority {
        async fn status(&self, _proposal_id: &str) -> Result<ApprovalStatus, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err("connection reset".to_string())
            } else {
                Ok(ApprovalStatus::Approved {
                    token: "t1".to_string(),
                })
            }
        }
    }

    fn gate_with(authority: Arc<dyn ApprovalAuthority>) -> ApprovalGate {
        ApprovalGate::new(authority, Duration::from_millis(10), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn approved_on_second_poll() {
        let authority = Arc::new(ScriptedAuthority::new(
            1,
            ApprovalStatus::Approved {
                token: "tok".to_string(),
            },
        ));
        let gate = gate_with(authority.clone());
        let proposal = ToolProposal::new("delete_file", serde_json::json!({"path": "X"}));
        let parent = CancellationToken::new();

        let handle = gate.register(&proposal, &parent).await;
        assert!(gate.is_tracked(&proposal.proposal_id).await);

        let decision = gate.await_decision(handle).await;
        assert_eq!(
            decision,
            Some(ApprovalDecision::Approved {
                token: "tok".to_string()
            })
        );
        assert_eq!(authority.calls.load(Ordering::SeqCst), 2);
        assert!(!gate.is_tracked(&proposal.proposal_id).await);
    }

    #[tokio::test]
    async fn rejected_is_terminal() {
        let gate = gate_with(Arc::new(ScriptedAuthority::new(0, ApprovalStatus::Rejected)));
        let proposal = ToolProposal::new("shell", serde_json::json!({"command": "rm -rf"}));
        let parent = CancellationToken::new();

        let handle = gate.register(&proposal, &parent).await;
        let decision = gate.await_decision(handle).await;
        assert_eq!(decision, Some(ApprovalDecision::Rejected));
        assert_eq!(gate.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn pending_past_deadline_times_out() {
        let authority = Arc::new(AlwaysPending {
            calls: AtomicUsize::new(0),
        });
        let gate = ApprovalGate::new(
            authority.clone(),
            Duration::from_millis(10),
            Duration::from_millis(60),
        );
        let proposal = ToolProposal::new("shell", serde_json::json!({}));
        let parent = CancellationToken::new();

        let handle = gate.register(&proposal, &parent).await;
        let decision = gate.await_decision(handle).await;

        assert_eq!(decision, Some(ApprovalDecision::TimedOut));
        assert!(!gate.is_tracked(&proposal.proposal_id).await);
        // pending 读取只会重试，从不改写任何状态
        assert!(authority.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn transient_failures_are_swallowed() {
        let gate = gate_with(Arc::new(FlakyAuthority {
            failures: 3,
            calls: AtomicUsize::new(0),
        }));
        let proposal = ToolProposal::new("echo", serde_json::json!({}));
        let parent = CancellationToken::new();

        let handle = gate.register(&proposal, &parent).await;
        let decision = gate.await_decision(handle).await;
        assert_eq!(
            decision,
            Some(ApprovalDecision::Approved {
                token: "t1".to_string()
            })
        );
    }

    #[tokio::test]
    async fn cancel_stops_polling_and_untracks() {
        let authority = Arc::new(AlwaysPending {
            calls: AtomicUsize::new(0),
        });
        let gate = Arc::new(ApprovalGate::new(
            authority.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
        ));
        let proposal = ToolProposal::new("shell", serde_json::json!({}));
        let parent = CancellationToken::new();

        let handle = gate.register(&proposal, &parent).await;
        let id = proposal.proposal_id.clone();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_decision(handle).await })
        };

        tokio::time::sleep(Duration::from_millis(35)).await;
        gate.cancel(&id).await;
        let decision = waiter.await.unwrap();
        assert_eq!(decision, None);
        assert!(!gate.is_tracked(&id).await);

        // 取消后不再有任何轮询
        let after = authority.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(authority.calls.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn cancel_of_one_proposal_leaves_others_tracked() {
        let gate = gate_with(Arc::new(AlwaysPending {
            calls: AtomicUsize::new(0),
        }));
        let a = ToolProposal::new("shell", serde_json::json!({}));
        let b = ToolProposal::new("echo", serde_json::json!({}));
        let parent_a = CancellationToken::new();
        let parent_b = CancellationToken::new();

        let _ha = gate.register(&a, &parent_a).await;
        let _hb = gate.register(&b, &parent_b).await;
        assert_eq!(gate.tracked_count().await, 2);

        gate.cancel(&a.proposal_id).await;
        assert!(!gate.is_tracked(&a.proposal_id).await);
        assert!(gate.is_tracked(&b.proposal_id).await);
    }

    #[tokio::test]
    async fn cancel_unknown_proposal_is_noop() {
        let gate = gate_with(Arc::new(AlwaysPending {
            calls: AtomicUsize::new(0),
        }));
        gate.cancel("proposal_missing").await;
        assert_eq!(gate.tracked_count().await, 0);
    }
}
