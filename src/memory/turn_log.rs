//! Turn Log：单轮过程的观测投影
//!
//! 记录工具提案的派发/审批/结果/错误，仅追加，供展示与排查使用；
//! 编排器的控制决策从不读取它。

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 日志条目状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// 审批通过，已向模型网关派发续写
    Dispatched,
    /// 提案已登记，等待外部审批
    PendingApproval,
    /// 续写成功返回
    Success,
    /// 拒绝 / 超时 / 取消 / 调用失败
    Error,
}

/// 单条日志：工具名、参数、状态、可选输出预览与提案 ID
#[derive(Clone, Debug, Serialize)]
pub struct TurnLogEntry {
    pub tool: String,
    pub args: serde_json::Value,
    pub status: TurnStatus,
    pub output_preview: Option<String>,
    pub proposal_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl TurnLogEntry {
    pub fn new(tool: impl Into<String>, args: serde_json::Value, status: TurnStatus) -> Self {
        Self {
            tool: tool.into(),
            args,
            status,
            output_preview: None,
            proposal_id: None,
            at: Utc::now(),
        }
    }

    pub fn with_proposal_id(mut self, proposal_id: impl Into<String>) -> Self {
        self.proposal_id = Some(proposal_id.into());
        self
    }

    pub fn with_output_preview(mut self, preview: impl Into<String>) -> Self {
        self.output_preview = Some(preview.into());
        self
    }
}

/// 仅追加的 Turn Log
#[derive(Clone, Debug, Default)]
pub struct TurnLog {
    entries: Vec<TurnLogEntry>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TurnLogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TurnLogEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<TurnLogEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
