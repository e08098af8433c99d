//! Risk-service response types, resolved once at the deserialization
//! boundary.
//!
//! The remote service is loosely typed: fields come and go between report
//! versions, and holder data arrives either as a list of per-holder records
//! or as a dict carrying a precomputed aggregate. Everything optional is
//! modeled as `Option` here so the evaluator never probes raw JSON.

use serde::Deserialize;
use std::cmp::Ordering;

/// How many holders count toward the concentration figure.
const TOP_HOLDER_COUNT: usize = 10;

/// One report from the rug-risk service, keyed by mint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    /// Composite risk score; higher implies higher risk
    pub score: Option<f64>,
    /// Total market liquidity across listed pools
    pub total_market_liquidity: Option<f64>,
    /// Token creator address
    pub creator: Option<String>,
    /// Mint authority; an active one can print new supply
    pub mint_authority: Option<String>,
    /// Freeze authority; an active one can freeze holder accounts
    pub freeze_authority: Option<String>,
    /// Holder data in either supported shape
    pub top_holders: Option<TopHolders>,
}

/// Holder data as delivered by the service. Report versions disagree on the
/// shape, so both are accepted and resolved here.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TopHolders {
    /// Dict form with a precomputed aggregate; trusted directly
    Aggregate(HolderAggregate),
    /// List of per-holder records; concentration is recomputed from amounts
    Listed(Vec<HolderRecord>),
}

/// Precomputed aggregate shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderAggregate {
    pub total_percentage: f64,
}

/// Per-holder record shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderRecord {
    #[serde(default)]
    pub address: Option<String>,
    pub amount: f64,
}

impl TopHolders {
    /// Combined share of the top holders, in percent.
    ///
    /// For the list shape this sums the ten largest raw amounts and divides
    /// by the total across every listed holder, so the result is invariant
    /// to the original listing order. Returns None for an empty list.
    pub fn concentration(&self) -> Option<f64> {
        match self {
            TopHolders::Aggregate(agg) => Some(agg.total_percentage),
            TopHolders::Listed(holders) => {
                if holders.is_empty() {
                    return None;
                }
                let total: f64 = holders.iter().map(|h| h.amount).sum();
                if total <= 0.0 {
                    return Some(0.0);
                }
                let mut amounts: Vec<f64> = holders.iter().map(|h| h.amount).collect();
                amounts.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
                let top: f64 = amounts.iter().take(TOP_HOLDER_COUNT).sum();
                Some(top / total * 100.0)
            }
        }
    }
}
