//! 关键词内存检索：按词重叠打分的简单实现
//!
//! 无真实向量，适合本地默认与测试；范围过滤按 metadata 中的 project_id。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::retrieval::{QueryScope, RetrievalClient, Snippet};

struct Entry {
    text: String,
    source_id: String,
    project_id: Option<String>,
    tokens: HashSet<String>,
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 内存检索索引：ingest 追加，query 按词重叠取 top_k
#[derive(Clone)]
pub struct KeywordRetrieval {
    store: Arc<RwLock<Vec<Entry>>>,
    max_entries: usize,
}

impl KeywordRetrieval {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }
}

impl Default for KeywordRetrieval {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl RetrievalClient for KeywordRetrieval {
    async fn query(
        &self,
        text: &str,
        scope: Option<&QueryScope>,
        top_k: usize,
    ) -> Result<Vec<Snippet>, String> {
        let query_tokens = tokenize_lower(text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let wanted_project = scope.and_then(|s| s.project_id.as_deref());

        let store = self.store.read().map_err(|e| e.to_string())?;
        let mut scored: Vec<(usize, Snippet)> = store
            .iter()
            .filter(|entry| match wanted_project {
                Some(p) => entry.project_id.as_deref() == Some(p),
                None => true,
            })
            .map(|entry| {
                let score = query_tokens.intersection(&entry.tokens).count();
                (score, Snippet::new(&entry.text, &entry.source_id))
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().take(top_k).map(|(_, s)| s).collect())
    }

    async fn ingest(
        &self,
        text: &str,
        source_id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let entry = Entry {
            text: text.to_string(),
            source_id: source_id.to_string(),
            project_id: metadata.get("project_id").cloned(),
            tokens: tokenize_lower(text),
        };
        let mut store = self.store.write().map_err(|e| e.to_string())?;
        store.push(entry);
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
        Ok(())
    }
}
