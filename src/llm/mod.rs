//! 模型网关：完成、续写与模型列表
//!
//! 所有后端（Ollama 风格 HTTP / Mock / 测试脚本）实现 ModelClient；
//! 返回要么是最终回答，要么是待审批的工具提案。

pub mod http;
pub mod mock;
pub mod traits;

pub use http::{parse_model_output, HttpModelClient};
pub use mock::{MockModelClient, ScriptedModelClient};
pub use traits::{ModelClient, ModelResponse};
