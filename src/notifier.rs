//! Operator notification over Telegram.
//!
//! Delivery is rate-limited and retried with exponential backoff; a message
//! that still cannot be delivered is logged and dropped, never fatal to the
//! pipeline. The optional token header image rides along when enabled.

use crate::rate_limit::ApiRateLimiter;
use crate::types::EvaluationResult;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::{error, info, instrument, warn};

/// Score above which a token is labeled highest-risk.
const HIGH_RISK_SCORE: f64 = 75.0;
/// Score above which a token is labeled medium-risk.
const MEDIUM_RISK_SCORE: f64 = 40.0;
/// Ceiling for a single backoff delay between delivery attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Delivery failure for one attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("telegram returned status {0}")]
    Status(u16),
}

/// Seam over the operator channel so the pipeline is testable offline.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one evaluation outcome. Implementations absorb their own
    /// failures; the pipeline never sees them.
    async fn notify(&self, result: &EvaluationResult);

    /// Deliver a free-form operator message (startup, shutdown).
    async fn announce(&self, text: &str);
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    parse_mode: &'a str,
}

/// Telegram bot-API sink.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
    limiter: Arc<ApiRateLimiter>,
    retry_attempts: usize,
    retry_base_delay: Duration,
    send_token_image: bool,
}

impl TelegramNotifier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        bot_token: String,
        chat_id: String,
        limiter: Arc<ApiRateLimiter>,
        retry_attempts: usize,
        retry_base_delay: Duration,
        send_token_image: bool,
    ) -> Self {
        Self {
            http,
            bot_token,
            chat_id,
            limiter,
            retry_attempts: retry_attempts.max(1),
            retry_base_delay,
            send_token_image,
        }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(self.retry_base_delay.as_millis() as u64)
            .max_delay(MAX_RETRY_DELAY)
            .take(self.retry_attempts.saturating_sub(1))
    }

    async fn post(&self, method: &str, body: &impl Serialize) -> Result<(), NotifyError> {
        self.limiter.acquire().await;
        let url = format!("https://api.telegram.org/bot{}/{}", self.bot_token, method);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
        };
        Retry::spawn(self.backoff(), || self.post("sendMessage", &body)).await
    }

    async fn send_photo(&self, photo_url: &str) -> Result<(), NotifyError> {
        let body = SendPhoto {
            chat_id: &self.chat_id,
            photo: photo_url,
            parse_mode: "Markdown",
        };
        Retry::spawn(self.backoff(), || self.post("sendPhoto", &body)).await
    }
}

#[async_trait]
impl AlertSink for TelegramNotifier {
    #[instrument(skip(self, result), fields(mint = %result.mint))]
    async fn notify(&self, result: &EvaluationResult) {
        if self.send_token_image {
            let photo_url = token_image_url(&result.mint);
            if let Err(e) = self.send_photo(&photo_url).await {
                warn!(mint = %result.mint, error = %e, "token image delivery failed");
            }
        }

        match self.send_message(&format_report(result)).await {
            Ok(()) => info!(mint = %result.mint, passed = result.passed, "notification sent"),
            Err(e) => {
                error!(mint = %result.mint, error = %e, "notification delivery exhausted retries")
            }
        }
    }

    async fn announce(&self, text: &str) {
        if let Err(e) = self.send_message(text).await {
            error!(error = %e, "announcement delivery exhausted retries");
        }
    }
}

/// DexScreener header image for a mint.
fn token_image_url(mint: &str) -> String {
    format!("https://dd.dexscreener.com/ds-data/tokens/solana/{mint}/header.png")
}

/// Risk tier label for a composite score.
pub fn risk_label(score: f64) -> &'static str {
    if score > HIGH_RISK_SCORE {
        "🚨 HIGH RISK"
    } else if score > MEDIUM_RISK_SCORE {
        "⚠️ MEDIUM RISK"
    } else {
        "✅ LOW RISK"
    }
}

/// Build the operator summary for one evaluation.
pub fn format_report(result: &EvaluationResult) -> String {
    let mut message = String::from("📊 *RugCheck Results*\n\n");
    message.push_str(&format!("• *Token Mint:* `{}`\n", result.mint));
    message.push_str(&format!("• *Source:* {}\n", result.source));
    message.push_str(&format!(
        "• *Detected:* {}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    match result.risk_score {
        Some(score) => {
            message.push_str(&format!("• *Risk Score:* {} ({})\n", score, risk_label(score)))
        }
        None => message.push_str("• *Risk Score:* unavailable\n"),
    }
    if let Some(liquidity) = result.liquidity {
        message.push_str(&format!("• *Liquidity:* {liquidity:.2}\n"));
    }
    message.push_str(&format!(
        "• *Creator:* `{}`\n",
        result.creator.as_deref().unwrap_or("Unknown")
    ));
    message.push_str(&format!(
        "• *Mint Authority:* `{}`\n",
        result.mint_authority.as_deref().unwrap_or("None")
    ));
    message.push_str(&format!(
        "• *Freeze Authority:* `{}`\n",
        result.freeze_authority.as_deref().unwrap_or("None")
    ));
    if let Some(concentration) = result.holder_concentration {
        message.push_str(&format!("• *Top 10 Holders:* `{concentration:.2}%`\n"));
    }

    if result.passed {
        message.push_str("\n✅ *All enabled checks passed*\n");
    } else {
        message.push_str("\n❌ *Checks failed:*\n");
        for reason in &result.reasons {
            message.push_str(&format!("  • {reason}\n"));
        }
    }

    message.push_str(&format!(
        "\n• *Explore:*  [DexScreener](https://dexscreener.com/solana/{mint})  | [Solscan](https://solscan.io/token/{mint})\n",
        mint = result.mint
    ));
    message.push_str("\n⚠️ _This is not financial advice. Always DYOR before investing._");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceProgram;

    fn result() -> EvaluationResult {
        EvaluationResult {
            mint: "Mint1111111111111111111111111111111111111111".to_string(),
            source: SourceProgram::Raydium,
            passed: false,
            reasons: vec!["Mint authority enabled (enabled)".to_string()],
            risk_score: Some(82.0),
            liquidity: Some(1234.5),
            mint_authority: Some("enabled".to_string()),
            freeze_authority: Some("disabled".to_string()),
            creator: Some("Creator111".to_string()),
            holder_concentration: Some(55.5),
        }
    }

    #[test]
    fn test_risk_label_tiers() {
        assert_eq!(risk_label(90.0), "🚨 HIGH RISK");
        assert_eq!(risk_label(76.0), "🚨 HIGH RISK");
        assert_eq!(risk_label(75.0), "⚠️ MEDIUM RISK");
        assert_eq!(risk_label(41.0), "⚠️ MEDIUM RISK");
        assert_eq!(risk_label(40.0), "✅ LOW RISK");
        assert_eq!(risk_label(0.0), "✅ LOW RISK");
    }

    #[test]
    fn test_report_carries_verdict_and_reasons() {
        let text = format_report(&result());
        assert!(text.contains("Mint1111111111111111111111111111111111111111"));
        assert!(text.contains("🚨 HIGH RISK"));
        assert!(text.contains("Mint authority enabled (enabled)"));
        assert!(text.contains("❌ *Checks failed:*"));
    }

    #[test]
    fn test_report_contains_both_explorer_links() {
        let text = format_report(&result());
        assert!(text.contains(
            "https://dexscreener.com/solana/Mint1111111111111111111111111111111111111111"
        ));
        assert!(text.contains(
            "https://solscan.io/token/Mint1111111111111111111111111111111111111111"
        ));
    }

    #[test]
    fn test_passed_report_has_no_failure_section() {
        let mut passed = result();
        passed.passed = true;
        passed.reasons.clear();
        let text = format_report(&passed);
        assert!(text.contains("✅ *All enabled checks passed*"));
        assert!(!text.contains("Checks failed"));
    }

    #[test]
    fn test_missing_score_is_reported_as_unavailable() {
        let mut unavailable = result();
        unavailable.risk_score = None;
        let text = format_report(&unavailable);
        assert!(text.contains("*Risk Score:* unavailable"));
    }

    #[test]
    fn test_image_url_template() {
        assert_eq!(
            token_image_url("MintX"),
            "https://dd.dexscreener.com/ds-data/tokens/solana/MintX/header.png"
        );
    }
}
