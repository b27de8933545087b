//! 展示状态投影
//!
//! 调用方（CLI/Web 前端）只拿轻量的 DisplayState：阶段、历史、Turn Log、
//! 未决提案与锁；完整状态由会话运行时维护并在轮次边界投影。

use serde::Serialize;

use crate::approval::ToolProposal;
use crate::memory::{Message, TurnLogEntry};

/// 会话阶段（展示用）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Thinking,
    AwaitingApproval,
    Error,
}

/// 调用方看到的「投影」状态
#[derive(Clone, Debug, Serialize)]
pub struct DisplayState {
    pub phase: SessionPhase,
    pub history: Vec<Message>,
    pub turn_log: Vec<TurnLogEntry>,
    pub pending_proposal: Option<ToolProposal>,
    pub input_locked: bool,
    pub error_message: Option<String>,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            history: Vec::new(),
            turn_log: Vec::new(),
            pending_proposal: None,
            input_locked: false,
            error_message: None,
        }
    }
}

impl DisplayState {
    /// 从会话快照构造投影
    pub fn project(
        session: &crate::orchestrator::Session,
        phase: SessionPhase,
        input_locked: bool,
        error_message: Option<String>,
    ) -> Self {
        Self {
            phase,
            history: session.history.snapshot(),
            turn_log: session.turn_log.snapshot(),
            pending_proposal: session.pending_proposal.clone(),
            input_locked,
            error_message,
        }
    }
}
