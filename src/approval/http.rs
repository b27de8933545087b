//! HTTP 审批方客户端
//!
//! GET {base}/api/approvals/{proposal_id}，响应体为 ApprovalStatus 线协议
//! （{"status": "pending" | "approved" | "rejected", "token"?: ...}）。
//! 网络错误直接上抛为 String，由 ApprovalGate 作为瞬态吞掉。

use std::time::Duration;

use async_trait::async_trait;

use crate::approval::{ApprovalAuthority, ApprovalStatus};

/// 外部审批服务客户端
pub struct HttpApprovalAuthority {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApprovalAuthority {
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
}

#[async_trait]
impl ApprovalAuthority for HttpApprovalAuthority {
    async fn status(&self, proposal_id: &str) -> Result<ApprovalStatus, String> {
        let url = format!(
            "{}/api/approvals/{}",
            self.base_url.trim_end_matches('/'),
            proposal_id
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("approval authority returned {}", resp.status()));
        }
        resp.json::<ApprovalStatus>().await.map_err(|e| e.to_string())
    }
}
