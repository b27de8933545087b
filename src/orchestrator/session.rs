//! 会话聚合：一份对话历史 + 至多一个未决提案 + Turn Log
//!
//! 会话随面板打开创建、关闭或重置时整体丢弃；历史在会话生命周期内仅追加。
//! turn_active 是单轮守卫：同一会话禁止并发轮次（历史是单一线性序列）。

use crate::approval::ToolProposal;
use crate::memory::{ConversationHistory, TurnLog};
use crate::retrieval::{QueryScope, Snippet};

/// 单个会话
pub struct Session {
    pub id: String,
    pub history: ConversationHistory,
    /// 至多一个未决工具提案
    pub pending_proposal: Option<ToolProposal>,
    pub turn_log: TurnLog,
    /// 检索范围（项目维度）
    pub scope: Option<QueryScope>,
    /// 显式选中的文档片段：非空时直接作接地上下文，不再查询
    pub pinned_snippets: Vec<Snippet>,
    /// 单轮进行中守卫
    pub turn_active: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            history: ConversationHistory::new(),
            pending_proposal: None,
            turn_log: TurnLog::new(),
            scope: None,
            pinned_snippets: Vec::new(),
            turn_active: false,
        }
    }

    pub fn with_scope(mut self, scope: QueryScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// 固定接地片段（替代检索查询）
    pub fn pin_snippets(&mut self, snippets: Vec<Snippet>) {
        self.pinned_snippets = snippets;
    }

    /// 重置：丢弃历史与日志，开始新的仅追加序列；范围与选中文档保留
    pub fn reset(&mut self) {
        self.history = ConversationHistory::new();
        self.turn_log = TurnLog::new();
        self.pending_proposal = None;
        self.turn_active = false;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
