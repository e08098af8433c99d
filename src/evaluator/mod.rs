//! Risk evaluation against the remote rug-risk service.
//!
//! The remote call sits behind the [`RiskProvider`] trait so the criteria
//! logic is testable without a network. Transient failures are retried with
//! a linearly increasing delay; a definitive no-data outcome, or retry
//! exhaustion, becomes a rejection with an explicit reason rather than a
//! dropped event.

pub mod types;

pub use types::{HolderAggregate, HolderRecord, RiskReport, TopHolders};

use crate::config::Settings;
use crate::rate_limit::ApiRateLimiter;
use crate::types::{EvaluationResult, TokenCandidate};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;
use tracing::{debug, instrument, warn};

/// Failure modes of a risk-service call, split by retryability.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Network-level failure or server error; worth retrying
    #[error("transport error: {0}")]
    Transport(String),
    /// Malformed or partial response body; worth retrying
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The service definitively has nothing for this mint
    #[error("no data for mint")]
    NoData,
}

impl RiskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RiskError::Transport(_) | RiskError::Protocol(_))
    }
}

/// Seam over the remote rug-risk service.
#[async_trait]
pub trait RiskProvider: Send + Sync {
    /// Fetch one report for a mint. One call equals one remote attempt;
    /// retry policy lives in the evaluator, not here.
    async fn fetch_report(&self, mint: &str) -> Result<RiskReport, RiskError>;
}

/// HTTP client for the rugcheck report API.
pub struct RugCheckClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<ApiRateLimiter>,
}

impl RugCheckClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.rugcheck.xyz/v1";

    pub fn new(http: reqwest::Client, base_url: String, limiter: Arc<ApiRateLimiter>) -> Self {
        Self {
            http,
            base_url,
            limiter,
        }
    }
}

#[async_trait]
impl RiskProvider for RugCheckClient {
    #[instrument(skip(self), fields(mint = %mint))]
    async fn fetch_report(&self, mint: &str) -> Result<RiskReport, RiskError> {
        self.limiter.acquire().await;
        let url = format!("{}/tokens/{}/report", self.base_url, mint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RiskError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RiskError::NoData);
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RiskError::Transport(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(RiskError::NoData);
        }

        response
            .json::<RiskReport>()
            .await
            .map_err(|e| RiskError::Protocol(e.to_string()))
    }
}

/// Which criteria are enabled and their ceilings, lifted from settings.
#[derive(Debug, Clone)]
pub struct RiskCriteria {
    pub check_mint_authority: bool,
    pub check_freeze_authority: bool,
    pub check_top_holders: bool,
    pub max_top_holders_percentage: f64,
    pub risk_score_threshold: f64,
}

impl RiskCriteria {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            check_mint_authority: settings.check_mint_authority,
            check_freeze_authority: settings.check_freeze_authority,
            check_top_holders: settings.check_top_holders,
            max_top_holders_percentage: settings.max_top_holders_percentage,
            risk_score_threshold: settings.risk_score_threshold,
        }
    }
}

/// Named retry policy: total attempt budget and a linearly increasing delay
/// between attempts (base, 2×base, 3×base, ...).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delays to sleep between attempts; yields `max_attempts - 1` items.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.base_delay;
        (1..self.max_attempts as u32).map(move |i| base * i)
    }
}

/// Decides pass/fail for one candidate using the configured criteria.
pub struct RiskEvaluator {
    provider: Arc<dyn RiskProvider>,
    criteria: RiskCriteria,
    retry: RetryPolicy,
}

impl RiskEvaluator {
    pub fn new(provider: Arc<dyn RiskProvider>, criteria: RiskCriteria, retry: RetryPolicy) -> Self {
        Self {
            provider,
            criteria,
            retry,
        }
    }

    /// Evaluate one validated candidate. Always yields a result: criteria
    /// violations and unavailable reports both come back as rejections with
    /// their reasons attached.
    #[instrument(skip(self), fields(mint = %candidate.mint))]
    pub async fn evaluate(&self, candidate: &TokenCandidate) -> EvaluationResult {
        let provider = Arc::clone(&self.provider);
        let mint = candidate.mint.clone();
        let outcome = RetryIf::spawn(
            self.retry.delays(),
            move || {
                let provider = Arc::clone(&provider);
                let mint = mint.clone();
                async move { provider.fetch_report(&mint).await }
            },
            RiskError::is_retryable,
        )
        .await;

        match outcome {
            Ok(report) => {
                debug!(mint = %candidate.mint, "risk report received");
                self.apply_criteria(candidate, &report)
            }
            Err(e) => {
                warn!(mint = %candidate.mint, error = %e, "risk report unavailable");
                EvaluationResult::unavailable(
                    candidate,
                    format!("Risk report unavailable ({e})"),
                )
            }
        }
    }

    /// Run every enabled criterion and collect all triggered reasons; no
    /// short-circuiting, in fixed criterion order.
    fn apply_criteria(&self, candidate: &TokenCandidate, report: &RiskReport) -> EvaluationResult {
        let mut reasons = Vec::new();

        if self.criteria.check_mint_authority {
            if let Some(value) = active_authority(&report.mint_authority) {
                reasons.push(format!("Mint authority enabled ({value})"));
            }
        }

        if self.criteria.check_freeze_authority {
            if let Some(value) = active_authority(&report.freeze_authority) {
                reasons.push(format!("Freeze authority enabled ({value})"));
            }
        }

        let holder_concentration = report
            .top_holders
            .as_ref()
            .and_then(TopHolders::concentration);
        if self.criteria.check_top_holders {
            if let Some(concentration) = holder_concentration {
                if concentration > self.criteria.max_top_holders_percentage {
                    reasons.push(format!(
                        "Top holders control too much ({concentration}% > {}%)",
                        self.criteria.max_top_holders_percentage
                    ));
                }
            }
        }

        if let Some(score) = report.score {
            if score > self.criteria.risk_score_threshold {
                reasons.push(format!(
                    "Risk score too high ({score} > {})",
                    self.criteria.risk_score_threshold
                ));
            }
        }

        EvaluationResult {
            mint: candidate.mint.clone(),
            source: candidate.source,
            passed: reasons.is_empty(),
            reasons,
            risk_score: report.score,
            liquidity: report.total_market_liquidity,
            mint_authority: report.mint_authority.clone(),
            freeze_authority: report.freeze_authority.clone(),
            creator: report.creator.clone(),
            holder_concentration,
        }
    }
}

/// An authority is active unless absent, empty, or explicitly disabled.
fn active_authority(value: &Option<String>) -> Option<&str> {
    match value.as_deref() {
        Some(v)
            if !v.is_empty()
                && !v.eq_ignore_ascii_case("disabled")
                && !v.eq_ignore_ascii_case("none")
                && !v.eq_ignore_ascii_case("null") =>
        {
            Some(v)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceProgram;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct StubProvider {
        calls: AtomicUsize,
        script: Mutex<Vec<Result<RiskReport, RiskError>>>,
    }

    impl StubProvider {
        fn new(script: Vec<Result<RiskReport, RiskError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RiskProvider for StubProvider {
        async fn fetch_report(&self, _mint: &str) -> Result<RiskReport, RiskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .await
                .pop()
                .unwrap_or(Err(RiskError::NoData))
        }
    }

    fn candidate() -> TokenCandidate {
        TokenCandidate {
            mint: "TokenMint1111111111111111111111111111111111".to_string(),
            source: SourceProgram::Raydium,
        }
    }

    fn criteria() -> RiskCriteria {
        RiskCriteria {
            check_mint_authority: true,
            check_freeze_authority: true,
            check_top_holders: true,
            max_top_holders_percentage: 70.0,
            risk_score_threshold: 40.0,
        }
    }

    fn fast_retry(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    fn evaluator(
        provider: Arc<StubProvider>,
        criteria: RiskCriteria,
        attempts: usize,
    ) -> RiskEvaluator {
        RiskEvaluator::new(provider, criteria, fast_retry(attempts))
    }

    #[tokio::test]
    async fn test_all_triggered_reasons_collected_without_short_circuit() {
        // Scenario: enabled mint authority, disabled freeze authority, 85%
        // concentration against a 70% ceiling, score below threshold.
        let report = RiskReport {
            score: Some(30.0),
            mint_authority: Some("enabled".to_string()),
            freeze_authority: Some("disabled".to_string()),
            top_holders: Some(TopHolders::Aggregate(HolderAggregate {
                total_percentage: 85.0,
            })),
            ..RiskReport::default()
        };
        let provider = StubProvider::new(vec![Ok(report)]);
        let result = evaluator(Arc::clone(&provider), criteria(), 3)
            .evaluate(&candidate())
            .await;

        assert!(!result.passed);
        assert_eq!(
            result.reasons,
            vec![
                "Mint authority enabled (enabled)".to_string(),
                "Top holders control too much (85% > 70%)".to_string(),
            ]
        );
        assert_eq!(result.risk_score, Some(30.0));
        assert_eq!(result.holder_concentration, Some(85.0));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_clean_report_passes() {
        let report = RiskReport {
            score: Some(10.0),
            total_market_liquidity: Some(12_345.0),
            mint_authority: None,
            freeze_authority: Some("disabled".to_string()),
            top_holders: Some(TopHolders::Aggregate(HolderAggregate {
                total_percentage: 35.0,
            })),
            ..RiskReport::default()
        };
        let provider = StubProvider::new(vec![Ok(report)]);
        let result = evaluator(provider, criteria(), 3).evaluate(&candidate()).await;

        assert!(result.passed);
        assert!(result.reasons.is_empty());
        assert_eq!(result.liquidity, Some(12_345.0));
    }

    #[tokio::test]
    async fn test_score_over_threshold_fails() {
        let report = RiskReport {
            score: Some(90.0),
            ..RiskReport::default()
        };
        let provider = StubProvider::new(vec![Ok(report)]);
        let result = evaluator(provider, criteria(), 3).evaluate(&candidate()).await;

        assert!(!result.passed);
        assert_eq!(result.reasons, vec!["Risk score too high (90 > 40)".to_string()]);
    }

    #[tokio::test]
    async fn test_disabled_criteria_are_skipped() {
        let report = RiskReport {
            score: Some(10.0),
            mint_authority: Some("enabled".to_string()),
            freeze_authority: Some("enabled".to_string()),
            top_holders: Some(TopHolders::Aggregate(HolderAggregate {
                total_percentage: 99.0,
            })),
            ..RiskReport::default()
        };
        let provider = StubProvider::new(vec![Ok(report)]);
        let lax = RiskCriteria {
            check_mint_authority: false,
            check_freeze_authority: false,
            check_top_holders: false,
            ..criteria()
        };
        let result = evaluator(provider, lax, 3).evaluate(&candidate()).await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_transient_error_then_success_is_retried() {
        // Script pops from the back: first Transport, then the report.
        let report = RiskReport {
            score: Some(5.0),
            ..RiskReport::default()
        };
        let provider = StubProvider::new(vec![
            Ok(report),
            Err(RiskError::Transport("timeout".to_string())),
        ]);
        let result = evaluator(Arc::clone(&provider), criteria(), 3)
            .evaluate(&candidate())
            .await;

        assert!(result.passed);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_reported_rejection() {
        let provider = StubProvider::new(vec![
            Err(RiskError::Transport("a".to_string())),
            Err(RiskError::Transport("b".to_string())),
            Err(RiskError::Transport("c".to_string())),
        ]);
        let result = evaluator(Arc::clone(&provider), criteria(), 3)
            .evaluate(&candidate())
            .await;

        assert!(!result.passed);
        assert_eq!(provider.calls(), 3);
        assert_eq!(result.reasons.len(), 1);
        assert!(result.reasons[0].starts_with("Risk report unavailable"));
        assert!(result.risk_score.is_none());
    }

    #[tokio::test]
    async fn test_definitive_no_data_is_not_retried() {
        let provider = StubProvider::new(vec![Err(RiskError::NoData)]);
        let result = evaluator(Arc::clone(&provider), criteria(), 3)
            .evaluate(&candidate())
            .await;

        assert!(!result.passed);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_retry_policy_delays_increase_linearly() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(300),
            ]
        );
    }

    #[test]
    fn test_active_authority_classification() {
        assert_eq!(
            active_authority(&Some("enabled".to_string())),
            Some("enabled")
        );
        assert_eq!(
            active_authority(&Some("SomePubkey111".to_string())),
            Some("SomePubkey111")
        );
        assert_eq!(active_authority(&Some("disabled".to_string())), None);
        assert_eq!(active_authority(&Some("None".to_string())), None);
        assert_eq!(active_authority(&Some(String::new())), None);
        assert_eq!(active_authority(&None), None);
    }
}
