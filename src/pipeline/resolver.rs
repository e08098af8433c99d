//! Transaction resolution: signature → enhanced transaction payload.
//!
//! A failed lookup is treated as cheap to skip. The resolver never retries
//! internally; retry policy in this system lives at the evaluator and
//! notifier, where a lost call actually costs something.

use crate::rate_limit::ApiRateLimiter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Enhanced transaction payload, reduced to the fields extraction needs.
/// Fetched on demand, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetail {
    /// Token transfer records carried by the transaction
    #[serde(default)]
    pub token_transfers: Vec<TokenTransfer>,
    /// Flat per-account records, in instruction account order
    #[serde(default)]
    pub account_data: Vec<AccountRecord>,
}

/// One token transfer inside a transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTransfer {
    #[serde(default)]
    pub mint: Option<String>,
    #[serde(default)]
    pub from_token_account: Option<String>,
}

/// One account entry in the flat address list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub account: String,
}

/// Seam over the transaction-detail API.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Resolve one signature. `None` covers both "not found" and any
    /// transport or protocol failure; callers discard the event either way.
    async fn fetch(&self, signature: &str) -> Option<TransactionDetail>;
}

/// HTTP resolver against the Helius enhanced-transaction endpoint.
pub struct HeliusResolver {
    http: reqwest::Client,
    url: String,
    limiter: Arc<ApiRateLimiter>,
}

impl HeliusResolver {
    pub fn new(http: reqwest::Client, url: String, limiter: Arc<ApiRateLimiter>) -> Self {
        Self { http, url, limiter }
    }
}

#[async_trait]
impl TransactionSource for HeliusResolver {
    #[instrument(skip(self), fields(signature = %signature))]
    async fn fetch(&self, signature: &str) -> Option<TransactionDetail> {
        self.limiter.acquire().await;

        let payload = serde_json::json!({ "transactions": [signature] });
        let response = match self.http.post(&self.url).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(signature = %signature, error = %e, "transaction fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                signature = %signature,
                status = %response.status(),
                "transaction API returned non-success status"
            );
            return None;
        }

        match response.json::<Vec<TransactionDetail>>().await {
            Ok(mut batch) if !batch.is_empty() => {
                debug!(signature = %signature, "transaction resolved");
                Some(batch.swap_remove(0))
            }
            Ok(_) => {
                warn!(signature = %signature, "transaction API returned an empty batch");
                None
            }
            Err(e) => {
                warn!(signature = %signature, error = %e, "malformed transaction payload");
                None
            }
        }
    }
}
