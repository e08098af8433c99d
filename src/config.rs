//! Configuration surface: credentials from the environment, tunables from a
//! settings JSON file, and the derived set of watched programs.
//!
//! Startup refuses to proceed on missing credentials, a malformed settings
//! file, or an empty set of enabled sources.

use crate::types::{ProgramWatch, SourceProgram};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Default settings file next to the binary.
pub const DEFAULT_SETTINGS_PATH: &str = "settings_config.json";

/// Fatal configuration errors. The process refuses to start on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),
    #[error("malformed settings file {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read settings file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no sources enabled; enable at least one of raydium, pump_fun, boosted")]
    NoActiveSources,
    #[error("source {0} is enabled but has no program id configured")]
    MissingProgramId(SourceProgram),
}

/// Secrets pulled from the environment at startup.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub helius_api_key: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
}

impl Credentials {
    /// Read all required variables, collecting every missing one so the
    /// operator sees the full list at once.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut read = |name: &str| match std::env::var(name) {
            Ok(v) if !v.is_empty() => Some(v),
            _ => {
                missing.push(name.to_string());
                None
            }
        };

        let helius_api_key = read("HELIUS_API_KEY");
        let telegram_bot_token = read("TELEGRAM_BOT_TOKEN");
        let telegram_chat_id = read("TELEGRAM_CHAT_ID");

        match (helius_api_key, telegram_bot_token, telegram_chat_id) {
            (Some(helius_api_key), Some(telegram_bot_token), Some(telegram_chat_id)) => Ok(Self {
                helius_api_key,
                telegram_bot_token,
                telegram_chat_id,
            }),
            _ => Err(ConfigError::MissingEnv(missing)),
        }
    }

    /// Websocket endpoint for the log subscription.
    pub fn websocket_url(&self) -> String {
        format!("wss://mainnet.helius-rpc.com/?api-key={}", self.helius_api_key)
    }

    /// Enhanced-transaction endpoint for signature resolution.
    pub fn transaction_api_url(&self) -> String {
        format!(
            "https://api.helius.xyz/v0/transactions/?api-key={}",
            self.helius_api_key
        )
    }
}

/// All tunables, serde-defaulted so a partial settings file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Source toggles
    pub raydium: bool,
    pub pump_fun: bool,
    pub boosted: bool,
    /// Per-source program id overrides, keyed by source name
    pub program_ids: HashMap<String, String>,
    /// Per-source instruction marker overrides, keyed by source name
    pub instructions: HashMap<String, String>,

    // Risk criteria
    pub check_mint_authority: bool,
    pub check_freeze_authority: bool,
    pub check_top_holders: bool,
    pub max_top_holders_percentage: f64,
    pub risk_score_threshold: f64,
    pub send_token_image: bool,

    // Pipeline
    pub queue_capacity: usize,
    pub max_concurrent_evaluations: usize,
    pub seen_signature_cache_size: u64,

    // Rate limits (requests per second)
    pub transaction_api_rps: u32,
    pub risk_api_rps: u32,
    pub telegram_rps: u32,

    // Retry policy
    pub risk_retry_attempts: usize,
    pub risk_retry_base_delay_ms: u64,
    pub notify_retry_attempts: usize,
    pub notify_retry_base_delay_ms: u64,

    // Stream connection
    pub ws_ping_interval_secs: u64,
    pub ws_ping_timeout_secs: u64,
    pub reconnect_floor_ms: u64,
    pub reconnect_cap_ms: u64,
    /// Finite reconnect budget; None retries forever
    pub max_reconnect_attempts: Option<u32>,

    // Shutdown
    pub shutdown_grace_secs: u64,

    // Persistence
    pub valid_tokens_path: String,
    pub rejected_tokens_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            raydium: true,
            pump_fun: false,
            boosted: false,
            program_ids: HashMap::new(),
            instructions: HashMap::new(),
            check_mint_authority: true,
            check_freeze_authority: true,
            check_top_holders: true,
            max_top_holders_percentage: 70.0,
            risk_score_threshold: 40.0,
            send_token_image: false,
            queue_capacity: 100,
            max_concurrent_evaluations: 5,
            seen_signature_cache_size: 10_000,
            transaction_api_rps: 50,
            risk_api_rps: 5,
            telegram_rps: 25,
            risk_retry_attempts: 3,
            risk_retry_base_delay_ms: 2_000,
            notify_retry_attempts: 3,
            notify_retry_base_delay_ms: 1_000,
            ws_ping_interval_secs: 20,
            ws_ping_timeout_secs: 10,
            reconnect_floor_ms: 1_000,
            reconnect_cap_ms: 60_000,
            max_reconnect_attempts: None,
            shutdown_grace_secs: 10,
            valid_tokens_path: "valid_tokens.json".to_string(),
            rejected_tokens_path: "rejected_tokens.json".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file. A missing file falls back to defaults;
    /// a present-but-malformed file is fatal rather than silently ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let settings =
                    serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
                        path: path.display().to_string(),
                        source,
                    })?;
                info!(path = %path.display(), "loaded settings");
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "settings file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Unreadable {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Resolve the enabled sources into watch entries. Overrides from the
    /// `program_ids` / `instructions` maps win over built-in defaults.
    pub fn active_programs(&self) -> Result<NonEmpty<ProgramWatch>, ConfigError> {
        let mut watches = Vec::new();
        for source in SourceProgram::all() {
            let enabled = match source {
                SourceProgram::Raydium => self.raydium,
                SourceProgram::PumpFun => self.pump_fun,
                SourceProgram::Boosted => self.boosted,
            };
            if !enabled {
                continue;
            }
            let program_id = self
                .program_ids
                .get(source.as_str())
                .cloned()
                .or_else(|| default_program_id(source).map(str::to_string))
                .ok_or(ConfigError::MissingProgramId(source))?;
            let instruction_marker = self
                .instructions
                .get(source.as_str())
                .cloned()
                .unwrap_or_else(|| default_instruction_marker(source).to_string());
            watches.push(ProgramWatch {
                program_id,
                instruction_marker,
                source,
            });
        }
        NonEmpty::from_vec(watches).ok_or(ConfigError::NoActiveSources)
    }
}

fn default_program_id(source: SourceProgram) -> Option<&'static str> {
    match source {
        SourceProgram::Raydium => Some("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8"),
        SourceProgram::PumpFun => Some("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P"),
        // Boosted launches have no universal program; the operator must
        // configure one explicitly.
        SourceProgram::Boosted => None,
    }
}

fn default_instruction_marker(source: SourceProgram) -> &'static str {
    match source {
        SourceProgram::Raydium => "initialize2: InitializeInstruction2",
        SourceProgram::PumpFun => "Program log: Instruction: Create",
        SourceProgram::Boosted => "initialize2: InitializeInstruction2",
    }
}
