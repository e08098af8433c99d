//! Poolwatch - Solana liquidity-pool monitor with automated rug-risk checks.
//!
//! Watches a JSON-RPC log stream for newly created pools, resolves each
//! transaction, extracts the candidate mint, runs a multi-criteria trust
//! evaluation against a remote rug-risk service, persists the verdict, and
//! notifies an operator over Telegram.

pub mod config;
pub mod evaluator;
pub mod notifier;
pub mod pipeline;
pub mod rate_limit;
pub mod store;
pub mod stream;
pub mod types;
pub mod validator;

// Re-export main types for convenience
pub use types::{EvaluationResult, ProgramWatch, SourceProgram, StreamEvent, TokenCandidate};
