//! 轮次错误分类
//!
//! 检索失败与审批轮询的瞬态失败不在此列：前者本轮以空上下文继续，
//! 后者由审批门吞掉重试，二者从不作为错误浮出。任何浮出的失败都
//! 保证用户消息已留在历史中，会话可以立即再次提交。

use thiserror::Error;

/// 轮次执行可能浮出的错误
#[derive(Error, Debug)]
pub enum ChatError {
    /// 空输入，直接拒绝
    #[error("Empty input")]
    EmptyInput,

    /// 同一会话已有轮次进行中（使用错误，无状态变更）
    #[error("Turn already in progress")]
    TurnInProgress,

    /// 已有未决提案时又收到新提案（使用错误）
    #[error("Concurrent proposal: {0}")]
    ConcurrentProposal(String),

    /// 模型网关不可用；用户消息保留，可重新提交
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// 提案被审批方拒绝（预期内的非成功终局，会话仍可用）
    #[error("Tool proposal rejected: {0}")]
    ToolRejected(String),

    /// 审批超时（同上）
    #[error("Approval timed out: {0}")]
    ApprovalTimeout(String),

    /// 轮次被调用方取消
    #[error("Cancelled")]
    Cancelled,
}
