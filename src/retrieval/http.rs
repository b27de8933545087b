//! HTTP 检索服务客户端
//!
//! POST {base}/api/rag/query：{query, top_k, metadata?} -> {results: [{content, source}]}
//! POST {base}/api/rag/upload：{content, source, metadata}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::retrieval::{QueryScope, RetrievalClient, Snippet};

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Deserialize)]
struct QueryResult {
    content: String,
    #[serde(default)]
    source: String,
}

/// 外部检索服务客户端（RAG 服务）
pub struct HttpRetrievalClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetrievalClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl RetrievalClient for HttpRetrievalClient {
    async fn query(
        &self,
        text: &str,
        scope: Option<&QueryScope>,
        top_k: usize,
    ) -> Result<Vec<Snippet>, String> {
        let mut body = serde_json::json!({
            "query": text,
            "top_k": top_k,
        });
        if let Some(project_id) = scope.and_then(|s| s.project_id.as_deref()) {
            body["metadata"] = serde_json::json!({ "project_id": project_id });
        }

        let resp = self
            .client
            .post(self.url("/api/rag/query"))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("retrieval service returned {}", resp.status()));
        }
        let parsed: QueryResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| Snippet::new(r.content, r.source))
            .collect())
    }

    async fn ingest(
        &self,
        text: &str,
        source_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), String> {
        let body = serde_json::json!({
            "content": text,
            "source": source_id,
            "metadata": metadata,
        });
        let resp = self
            .client
            .post(self.url("/api/rag/upload"))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("retrieval upload returned {}", resp.status()));
        }
        Ok(())
    }
}
