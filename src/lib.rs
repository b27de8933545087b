//! Apiary - Rust 对话编排器
//!
//! 模块划分：
//! - **approval**: 审批门（提案登记、定时轮询外部审批方、截止与取消）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、展示状态投影、会话运行时（命令/状态/事件三通道）
//! - **llm**: 模型网关抽象与实现（Ollama 风格 HTTP / Mock）
//! - **memory**: 对话历史（仅追加）与 Turn Log 观测投影
//! - **observability**: tracing 初始化
//! - **orchestrator**: 会话聚合与单轮状态机（检索接地 -> 模型 -> 审批 -> 续写）
//! - **retrieval**: 检索网关抽象与实现（HTTP / 关键词内存索引 / Noop）

pub mod approval;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod retrieval;
