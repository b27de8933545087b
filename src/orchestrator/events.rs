//! 单轮过程事件：供前端展示思考、接地、审批与回复进度
//!
//! 纯展示投影，无控制权；编排器只写不读。

use serde::Serialize;

/// 过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 正在调用模型
    Thinking,
    /// 检索到接地上下文（片段数）
    GroundingContext { count: usize },
    /// 检索失败，本轮以空上下文继续
    RetrievalSkipped { reason: String },
    /// 提案已登记，等待带外审批（横幅/轮询指示）
    ProposalPending {
        tool: String,
        args: serde_json::Value,
        proposal_id: String,
    },
    /// 审批通过，开始续写
    ToolApproved { tool: String },
    /// 提案被拒绝
    ToolRejected { tool: String },
    /// 审批超时
    ApprovalTimedOut { tool: String },
    /// 续写返回的结果预览
    ToolResult { tool: String, preview: String },
    /// 最终回复的一小段（流式展示）
    MessageChunk { text: String },
    /// 最终回复结束
    MessageDone,
    /// 错误
    Error { text: String },
}
