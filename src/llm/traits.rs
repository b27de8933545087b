//! 模型客户端抽象
//!
//! complete：携带历史、可选接地上下文与工具开关，返回最终回答或工具提案；
//! continue_with_tool：审批通过后的续写入口，携带原历史、工具与审批令牌，
//! 返回形状与 complete 相同（续写本身可以再提新提案）。

use async_trait::async_trait;
use serde_json::Value;

use crate::approval::ToolProposal;
use crate::memory::Message;
use crate::retrieval::Snippet;

/// 一次模型调用的结果：最终回答或工具提案
#[derive(Clone, Debug)]
pub enum ModelResponse {
    Final { content: String },
    Proposal(ToolProposal),
}

/// 模型客户端 trait
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// 完成：历史 + 可选接地片段 + 工具开关
    async fn complete(
        &self,
        history: &[Message],
        context: &[Snippet],
        tools_enabled: bool,
    ) -> Result<ModelResponse, String>;

    /// 续写：审批通过的工具调用绑定结果后继续本轮
    async fn continue_with_tool(
        &self,
        history: &[Message],
        tool: &str,
        args: &Value,
        approval_token: &str,
    ) -> Result<ModelResponse, String>;

    /// 可用模型列表；默认空，具体实现可覆盖
    async fn list_models(&self) -> Result<Vec<String>, String> {
        Ok(Vec::new())
    }
}
