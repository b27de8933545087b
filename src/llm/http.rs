//! Ollama 风格 HTTP 模型客户端
//!
//! POST {base}/api/chat：{model, messages, stream: false, options} -> {message: {content}}；
//! GET {base}/api/tags -> {models: [{name}]}；
//! 工具调用约定：模型在文本中输出 {"tool": "...", "args": {...}} JSON，
//! parse_model_output 提取并铸造为 ToolProposal。续写走 {base}/api/tools/run
//! 执行已审批的调用，再把结果绑回历史发起下一次完成。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::approval::ToolProposal;
use crate::llm::{ModelClient, ModelResponse};
use crate::memory::Message;
use crate::retrieval::Snippet;

/// 从模型输出中提取工具调用 JSON
///
/// 优先 ```json 代码块，其次首个 {...} 片段；JSON 非法或 tool 为空时
/// 整段文本按最终回答处理（线上的模型偶尔会把 JSON 混进自然语言）。
pub fn parse_model_output(output: &str) -> ModelResponse {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or_else(|| rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        &trimmed[start..=end]
    } else {
        return ModelResponse::Final {
            content: trimmed.to_string(),
        };
    };

    #[derive(Deserialize)]
    struct RawToolCall {
        tool: String,
        #[serde(default)]
        args: Value,
    }

    match serde_json::from_str::<RawToolCall>(json_str) {
        Ok(call) if !call.tool.is_empty() => {
            ModelResponse::Proposal(ToolProposal::new(call.tool, call.args))
        }
        Ok(_) => ModelResponse::Final {
            content: trimmed.to_string(),
        },
        Err(e) => {
            tracing::debug!(error = %e, "Model output is not a tool call, treating as final answer");
            ModelResponse::Final {
                content: trimmed.to_string(),
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[derive(Deserialize)]
struct ToolRunResponse {
    #[serde(default)]
    output: String,
}

/// HTTP 模型客户端：持有端点、模型名、system prompt 与采样参数
pub struct HttpModelClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpModelClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// 拼 system：基础 prompt + 工具约定 + 接地上下文
    fn build_system(&self, context: &[Snippet], tools_enabled: bool) -> String {
        let mut system = self.system_prompt.clone();
        if tools_enabled {
            system.push_str(
                "\n\nWhen you need a tool, output exactly one JSON object and nothing else: \
                 {\"tool\": \"name\", \"args\": {...}}. \
                 Side-effecting tools require out-of-band approval before they run.",
            );
        }
        if !context.is_empty() {
            system.push_str("\n\nUse the following retrieved context when relevant:\n");
            for snippet in context {
                system.push_str(&format!("- [{}] {}\n", snippet.source_id, snippet.content));
            }
        }
        system
    }

    fn wire_messages(&self, system: &str, history: &[Message]) -> Vec<Value> {
        let mut out = vec![serde_json::json!({"role": "system", "content": system})];
        out.extend(history.iter().map(|m| {
            serde_json::json!({"role": m.role.as_str(), "content": m.content})
        }));
        out
    }

    async fn chat(&self, messages: Vec<Value>, tools_enabled: bool) -> Result<ModelResponse, String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let resp = self
            .client
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("model endpoint returned {}", resp.status()));
        }
        let parsed: ChatResponse = resp.json().await.map_err(|e| e.to_string())?;
        let content = parsed.message.map(|m| m.content).unwrap_or_default();

        if tools_enabled {
            Ok(parse_model_output(&content))
        } else {
            Ok(ModelResponse::Final {
                content: content.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(
        &self,
        history: &[Message],
        context: &[Snippet],
        tools_enabled: bool,
    ) -> Result<ModelResponse, String> {
        let system = self.build_system(context, tools_enabled);
        self.chat(self.wire_messages(&system, history), tools_enabled)
            .await
    }

    async fn continue_with_tool(
        &self,
        history: &[Message],
        tool: &str,
        args: &Value,
        approval_token: &str,
    ) -> Result<ModelResponse, String> {
        // 已审批的调用先在工具端执行，结果绑回历史再续写
        let run_body = serde_json::json!({
            "tool": tool,
            "args": args,
            "approval_token": approval_token,
        });
        let resp = self
            .client
            .post(self.url("/api/tools/run"))
            .json(&run_body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("tool runner returned {}", resp.status()));
        }
        let run: ToolRunResponse = resp.json().await.map_err(|e| e.to_string())?;

        let system = self.build_system(&[], true);
        let mut messages = self.wire_messages(&system, history);
        messages.push(serde_json::json!({
            "role": "assistant",
            "content": format!("Tool call: {tool} | args: {args}"),
        }));
        messages.push(serde_json::json!({
            "role": "tool",
            "content": format!("Observation from {tool}: {}", run.output),
        }));
        self.chat(messages, true).await
    }

    async fn list_models(&self) -> Result<Vec<String>, String> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("model endpoint returned {}", resp.status()));
        }
        let parsed: TagsResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_text_is_final() {
        match parse_model_output("你好，有什么可以帮忙的？") {
            ModelResponse::Final { content } => assert!(content.contains("你好")),
            _ => panic!("Expected final answer"),
        }
    }

    #[test]
    fn parse_bare_json_is_proposal() {
        let output = r#"{"tool": "delete_file", "args": {"path": "X"}}"#;
        match parse_model_output(output) {
            ModelResponse::Proposal(p) => {
                assert_eq!(p.tool, "delete_file");
                assert_eq!(p.args["path"], "X");
                assert!(!p.proposal_id.is_empty());
            }
            _ => panic!("Expected proposal"),
        }
    }

    #[test]
    fn parse_json_code_block_is_proposal() {
        let output = "先调用工具：\n```json\n{\"tool\": \"shell\", \"args\": {\"command\": \"ls\"}}\n```";
        match parse_model_output(output) {
            ModelResponse::Proposal(p) => assert_eq!(p.tool, "shell"),
            _ => panic!("Expected proposal"),
        }
    }

    #[test]
    fn parse_invalid_json_falls_back_to_final() {
        let output = "数据如下 {not json at all}";
        match parse_model_output(output) {
            ModelResponse::Final { content } => assert_eq!(content, output),
            _ => panic!("Expected final answer"),
        }
    }

    #[test]
    fn parse_empty_tool_name_is_final() {
        let output = r#"{"tool": "", "args": {}}"#;
        assert!(matches!(
            parse_model_output(output),
            ModelResponse::Final { .. }
        ));
    }
}
