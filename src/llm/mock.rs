//! Mock 模型客户端（无需端点即可跑通全流程）
//!
//! MockModelClient 回显最后一条 User 消息；ScriptedModelClient 按队列
//! 依次吐出预设响应，供测试驱动提案/续写分支。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{ModelClient, ModelResponse};
use crate::memory::{Message, Role};
use crate::retrieval::Snippet;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockModelClient;

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(
        &self,
        history: &[Message],
        context: &[Snippet],
        _tools_enabled: bool,
    ) -> Result<ModelResponse, String> {
        let last_user = history
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let grounding = if context.is_empty() {
            String::new()
        } else {
            format!(" (grounded on {} snippets)", context.len())
        };
        Ok(ModelResponse::Final {
            content: format!("Echo from Mock: {last_user}{grounding}"),
        })
    }

    async fn continue_with_tool(
        &self,
        _history: &[Message],
        tool: &str,
        _args: &Value,
        _approval_token: &str,
    ) -> Result<ModelResponse, String> {
        Ok(ModelResponse::Final {
            content: format!("Echo from Mock: {tool} executed"),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, String> {
        Ok(vec!["mock".to_string()])
    }
}

/// 脚本客户端：complete / continue_with_tool 共用一条响应队列
///
/// 记录每次续写收到的 (history_len, tool, approval_token)，供测试断言
/// 前缀一致性与令牌传递。
#[derive(Default)]
pub struct ScriptedModelClient {
    responses: Mutex<VecDeque<ModelResponse>>,
    continuations: Mutex<Vec<(usize, String, String)>>,
}

impl ScriptedModelClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            continuations: Mutex::new(Vec::new()),
        }
    }

    fn next(&self) -> Result<ModelResponse, String> {
        self.responses
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .ok_or_else(|| "script exhausted".to_string())
    }

    /// 已发生的续写调用：(调用时历史长度, 工具名, 审批令牌)
    pub fn continuations(&self) -> Vec<(usize, String, String)> {
        self.continuations.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(
        &self,
        _history: &[Message],
        _context: &[Snippet],
        _tools_enabled: bool,
    ) -> Result<ModelResponse, String> {
        self.next()
    }

    async fn continue_with_tool(
        &self,
        history: &[Message],
        tool: &str,
        _args: &Value,
        approval_token: &str,
    ) -> Result<ModelResponse, String> {
        if let Ok(mut log) = self.continuations.lock() {
            log.push((history.len(), tool.to_string(), approval_token.to_string()));
        }
        self.next()
    }
}
