//! 检索网关：接地上下文的查询与文档写入
//!
//! 编排器只把它当黑盒消费：query 返回按相关度排序的片段，失败时本轮以空
//! 上下文继续（接地是尽力而为，从不导致轮次失败）；ingest 供「对话保存」
//! 副作用使用，fire-and-forget。

pub mod http;
pub mod keyword;

pub use http::HttpRetrievalClient;
pub use keyword::KeywordRetrieval;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 检索片段：文本与来源标识
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub source_id: String,
}

impl Snippet {
    pub fn new(content: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_id: source_id.into(),
        }
    }
}

/// 查询范围元数据（当前仅项目维度）
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryScope {
    pub project_id: Option<String>,
}

impl QueryScope {
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
        }
    }
}

/// 检索客户端 trait：查询（排序片段）与写入（尽力而为）
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// 按查询文本与可选范围返回最相关的 top_k 片段
    async fn query(
        &self,
        text: &str,
        scope: Option<&QueryScope>,
        top_k: usize,
    ) -> Result<Vec<Snippet>, String>;

    /// 写入一段文本（对话保存等副作用路径）
    async fn ingest(
        &self,
        text: &str,
        source_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), String>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：检索未启用时使用
#[derive(Clone, Debug, Default)]
pub struct NoopRetrieval;

#[async_trait]
impl RetrievalClient for NoopRetrieval {
    async fn query(
        &self,
        _text: &str,
        _scope: Option<&QueryScope>,
        _top_k: usize,
    ) -> Result<Vec<Snippet>, String> {
        Ok(Vec::new())
    }

    async fn ingest(
        &self,
        _text: &str,
        _source_id: &str,
        _metadata: HashMap<String, String>,
    ) -> Result<(), String> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}
