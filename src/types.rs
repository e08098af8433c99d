//! Core types and data structures for the poolwatch pipeline.

use serde::{Deserialize, Serialize};

/// A mint address representation (string form; all chain access here is
/// opaque JSON, so no on-chain key type is needed)
pub type MintAddress = String;

/// Program families the stream watcher knows how to handle.
///
/// Each source has its own pool-initialization log marker and its own rule
/// for digging the mint address out of a resolved transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProgram {
    /// Raydium AMM pool initializations
    Raydium,
    /// Pump.fun token launches
    PumpFun,
    /// DexScreener-boosted launches (Raydium-shaped payloads)
    Boosted,
}

impl SourceProgram {
    /// Returns the string representation used in config maps and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceProgram::Raydium => "raydium",
            SourceProgram::PumpFun => "pump_fun",
            SourceProgram::Boosted => "boosted",
        }
    }

    /// Returns all known sources in config order.
    pub fn all() -> Vec<SourceProgram> {
        vec![
            SourceProgram::Raydium,
            SourceProgram::PumpFun,
            SourceProgram::Boosted,
        ]
    }
}

impl std::fmt::Display for SourceProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One watched program: its on-chain id, the log marker that identifies a
/// pool initialization, and which extraction rule family it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramWatch {
    /// The on-chain program id to mention in the subscription
    pub program_id: String,
    /// Substring that marks a pool-initialization log line
    pub instruction_marker: String,
    /// Which source family this program belongs to
    pub source: SourceProgram,
}

/// A raw event lifted off the log stream. Created on receipt, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Transaction signature carried by the notification
    pub signature: String,
    /// Ordered log lines from the notification
    pub logs: Vec<String>,
    /// The source whose marker matched
    pub source: SourceProgram,
}

/// A candidate mint extracted from a resolved transaction. Must pass the
/// address validator before any remote evaluation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCandidate {
    /// The extracted mint address
    pub mint: MintAddress,
    /// The program family the pool came from
    pub source: SourceProgram,
}

/// Final verdict for one candidate. Produced once, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// The evaluated mint address
    pub mint: MintAddress,
    /// The program family the pool came from
    pub source: SourceProgram,
    /// Whether every enabled criterion passed
    pub passed: bool,
    /// All triggered failure reasons, in criterion order
    pub reasons: Vec<String>,
    /// Composite risk score reported by the remote service
    pub risk_score: Option<f64>,
    /// Total market liquidity reported by the remote service
    pub liquidity: Option<f64>,
    /// Mint authority as reported (None when the service omitted it)
    pub mint_authority: Option<String>,
    /// Freeze authority as reported
    pub freeze_authority: Option<String>,
    /// Token creator as reported
    pub creator: Option<String>,
    /// Top-10 holder concentration in percent, when holder data was present
    pub holder_concentration: Option<f64>,
}

impl EvaluationResult {
    /// A rejection carrying a single reason, used when the risk service
    /// yielded no usable report after retries.
    pub fn unavailable(candidate: &TokenCandidate, reason: String) -> Self {
        Self {
            mint: candidate.mint.clone(),
            source: candidate.source,
            passed: false,
            reasons: vec![reason],
            risk_score: None,
            liquidity: None,
            mint_authority: None,
            freeze_authority: None,
            creator: None,
            holder_concentration: None,
        }
    }
}
