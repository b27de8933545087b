//! 审批门：工具提案的登记、轮询与终局裁决
//!
//! 模型提出的带副作用工具调用必须经外部审批方（approval authority）批准后
//! 才能续写执行。本模块定义提案与裁决类型、审批方抽象，以及定时轮询的
//! ApprovalGate（见 gate.rs）。

pub mod gate;
pub mod http;

pub use gate::{ApprovalGate, PollHandle};
pub use http::HttpApprovalAuthority;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 工具提案：模型请求执行指定工具，等待带外审批
///
/// 生成后归审批门跟踪，直到终局裁决或取消；每个会话同一时刻至多一个未决提案。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolProposal {
    pub tool: String,
    pub args: serde_json::Value,
    pub proposal_id: String,
    pub created_at: DateTime<Utc>,
}

impl ToolProposal {
    /// 生成新提案（随机 proposal_id）
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            args,
            proposal_id: format!("proposal_{}", uuid::Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

/// 审批方返回的提案状态（线协议）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved { token: String },
    Rejected,
}

/// 终局裁决；达成后提案即从跟踪集移除
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved { token: String },
    Rejected,
    TimedOut,
}

/// 审批方抽象：按 proposal_id 读取当前状态
///
/// 单次读取是尽力而为的：读失败视为瞬态，由轮询侧吞掉并在下一拍重试。
#[async_trait]
pub trait ApprovalAuthority: Send + Sync {
    async fn status(&self, proposal_id: &str) -> Result<ApprovalStatus, String>;
}

/// 自动批准：本地/非交互场景的兜底审批方（每次首拍即放行）
#[derive(Debug, Default)]
pub struct AutoApproveAuthority;

#[async_trait]
impl ApprovalAuthority for AutoApproveAuthority {
    async fn status(&self, proposal_id: &str) -> Result<ApprovalStatus, String> {
        Ok(ApprovalStatus::Approved {
            token: format!("auto_{proposal_id}"),
        })
    }
}
