//! Stream connection manager: one logical logsSubscribe over a websocket,
//! with exponential-backoff reconnects and a keep-alive ping.
//!
//! The manager owns the single producer side of the event queue. It never
//! does per-event work itself; matching notifications are handed to the
//! queue and everything downstream happens in worker tasks.

use crate::types::{ProgramWatch, StreamEvent};
use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use nonempty::NonEmpty;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Timeout for establishing the websocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle as observed by logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
    Closing,
}

/// Stream manager configuration, lifted from settings at startup.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Websocket endpoint
    pub url: String,
    /// Watched programs; one subscription mentions all of them
    pub programs: NonEmpty<ProgramWatch>,
    /// Keep-alive ping cadence
    pub ping_interval: Duration,
    /// Grace beyond the ping cadence before the peer counts as unresponsive
    pub ping_timeout: Duration,
    /// Backoff floor after the first failure
    pub backoff_floor: Duration,
    /// Backoff ceiling
    pub backoff_cap: Duration,
    /// Finite reconnect budget; None retries forever
    pub max_reconnect_attempts: Option<u32>,
}

/// How one connected session ended.
enum SessionEnd {
    /// Shutdown was signaled; stop reconnecting
    Shutdown,
    /// Connection dropped; `stable` records whether it survived its first
    /// inbound message (which resets the backoff)
    Dropped { stable: bool },
}

/// Reconnect delay for the given consecutive-failure count: floor doubling
/// per failure, capped. Failure count zero or one both yield the floor.
pub fn backoff_delay(floor: Duration, cap: Duration, consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(31);
    let delay = floor.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(cap)
}

/// Failure-streak update after a session or connect attempt ends. A drop
/// after a stable session clears the streak entirely, so only connect
/// failures and unstable sessions count toward the reconnect budget.
fn next_failure_count(current: u32, stable: bool) -> u32 {
    if stable {
        0
    } else {
        current.saturating_add(1)
    }
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: serde_json::Value,
}

/// The subscription request mentioning every watched program id.
fn subscription_request(programs: &NonEmpty<ProgramWatch>) -> JsonRpcRequest {
    let mentions: Vec<&str> = programs.iter().map(|p| p.program_id.as_str()).collect();
    JsonRpcRequest {
        jsonrpc: "2.0",
        id: 1,
        method: "logsSubscribe",
        params: serde_json::json!([
            { "mentions": mentions },
            { "commitment": "confirmed" }
        ]),
    }
}

#[derive(Deserialize)]
struct RpcMessage {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<RpcParams>,
}

#[derive(Deserialize)]
struct RpcParams {
    result: RpcResult,
}

#[derive(Deserialize)]
struct RpcResult {
    value: LogsValue,
}

#[derive(Deserialize)]
struct LogsValue {
    signature: String,
    logs: Vec<String>,
}

/// Parse one inbound frame into a stream event. Returns None for anything
/// that is not a marker-matching logs notification: subscription
/// confirmations quietly, malformed notifications with a warning.
///
/// With one subscription mentioning several programs, the event is
/// attributed to the first configured source whose marker appears.
fn parse_notification(
    programs: &NonEmpty<ProgramWatch>,
    raw: &str,
) -> Option<StreamEvent> {
    let message: RpcMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "discarding malformed stream frame");
            return None;
        }
    };
    if message.method.as_deref() != Some("logsNotification") {
        return None;
    }
    let value = match message.params {
        Some(params) => params.result.value,
        None => {
            warn!("logs notification without params, discarding");
            return None;
        }
    };

    for watch in programs.iter() {
        if value
            .logs
            .iter()
            .any(|line| line.contains(&watch.instruction_marker))
        {
            return Some(StreamEvent {
                signature: value.signature,
                logs: value.logs,
                source: watch.source,
            });
        }
    }
    None
}

/// Maintains the subscription and feeds the bounded event queue.
pub struct StreamConnectionManager {
    config: StreamConfig,
    state: ConnectionState,
}

impl StreamConnectionManager {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Run until shutdown. A configured reconnect budget, once exhausted,
    /// surfaces as a fatal error instead of being swallowed.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        events: mpsc::Sender<StreamEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.state = ConnectionState::Connecting;

            match self.connect_and_listen(&events, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Dropped { stable }) => {
                    consecutive_failures = next_failure_count(consecutive_failures, stable);
                }
                Err(e) => {
                    consecutive_failures = next_failure_count(consecutive_failures, false);
                    warn!(error = %e, failures = consecutive_failures, "connection attempt failed");
                }
            }

            if let Some(budget) = self.config.max_reconnect_attempts {
                if consecutive_failures >= budget {
                    self.state = ConnectionState::Disconnected;
                    return Err(anyhow!(
                        "reconnect budget exhausted after {budget} consecutive failures"
                    ));
                }
            }

            self.state = ConnectionState::Backoff;
            let delay = self.jittered_backoff(consecutive_failures);
            info!(
                delay_ms = delay.as_millis() as u64,
                failures = consecutive_failures,
                "reconnecting after backoff"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.state = ConnectionState::Closing;
        info!("stream connection manager shutting down");
        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    fn jittered_backoff(&self, consecutive_failures: u32) -> Duration {
        let base = backoff_delay(
            self.config.backoff_floor,
            self.config.backoff_cap,
            consecutive_failures,
        );
        // Up to 10% jitter so a fleet of watchers does not reconnect in step
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 10);
        base + Duration::from_millis(jitter_ms)
    }

    /// One connected session: subscribe, then pump frames until the peer
    /// drops, goes unresponsive, or shutdown is signaled.
    async fn connect_and_listen(
        &mut self,
        events: &mpsc::Sender<StreamEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let url = Url::parse(&self.config.url).context("parsing websocket URL")?;
        let (ws_stream, _response) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .context("connection timed out")?
            .context("websocket connect failed")?;
        self.state = ConnectionState::Connected;

        let (mut sink, mut stream) = ws_stream.split();

        // The subscription must be re-sent after every reconnect
        let request = subscription_request(&self.config.programs);
        let raw = serde_json::to_string(&request).context("serializing subscription")?;
        sink.send(Message::Text(raw))
            .await
            .context("sending subscription request")?;
        info!(
            programs = self.config.programs.len(),
            "connected and subscribed to log stream"
        );

        let mut ping_timer = tokio::time::interval(self.config.ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.reset();
        let mut last_inbound = Instant::now();
        let mut stable = false;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                _ = ping_timer.tick() => {
                    if last_inbound.elapsed() > self.config.ping_interval + self.config.ping_timeout {
                        warn!("peer unresponsive to keep-alive, forcing reconnect");
                        return Ok(SessionEnd::Dropped { stable });
                    }
                    sink.send(Message::Ping(Vec::new()))
                        .await
                        .context("sending keep-alive ping")?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        last_inbound = Instant::now();
                        stable = true;
                        if let Message::Text(raw) = message {
                            if let Some(event) = parse_notification(&self.config.programs, &raw) {
                                info!(
                                    signature = %event.signature,
                                    source = %event.source,
                                    "new pool detected"
                                );
                                // Bounded queue: await (never drop) when full
                                if events.send(event).await.is_err() {
                                    debug!("event queue closed, stopping stream");
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "stream error, reconnecting");
                        return Ok(SessionEnd::Dropped { stable });
                    }
                    None => {
                        warn!("stream closed by peer, reconnecting");
                        return Ok(SessionEnd::Dropped { stable });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceProgram;

    fn programs() -> NonEmpty<ProgramWatch> {
        NonEmpty::from_vec(vec![
            ProgramWatch {
                program_id: "RaydiumProgram111".to_string(),
                instruction_marker: "initialize2: InitializeInstruction2".to_string(),
                source: SourceProgram::Raydium,
            },
            ProgramWatch {
                program_id: "PumpProgram111".to_string(),
                instruction_marker: "Instruction: Create".to_string(),
                source: SourceProgram::PumpFun,
            },
        ])
        .unwrap()
    }

    fn notification(logs: &[&str]) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "subscription": 42,
                "result": {
                    "context": { "slot": 1 },
                    "value": {
                        "signature": "Sig111",
                        "logs": logs,
                    }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_backoff_never_decreases_and_is_capped() {
        let floor = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        let mut previous = Duration::ZERO;
        for failures in 1..100 {
            let delay = backoff_delay(floor, cap, failures);
            assert!(delay >= previous, "decreased at {failures}");
            assert!(delay <= cap, "exceeded cap at {failures}");
            previous = delay;
        }
        assert_eq!(backoff_delay(floor, cap, 1), floor);
        assert_eq!(backoff_delay(floor, cap, 2), floor * 2);
        assert_eq!(backoff_delay(floor, cap, 7), cap);
    }

    #[test]
    fn test_stable_drop_clears_the_failure_streak() {
        let floor = Duration::from_secs(1);
        let cap = Duration::from_secs(60);

        // A healthy connection dropping resets the streak, reconnects at the
        // floor, and never counts against a finite reconnect budget
        assert_eq!(next_failure_count(7, true), 0);
        assert_eq!(backoff_delay(floor, cap, 0), floor);
        assert!(next_failure_count(7, true) < 1);
    }

    #[test]
    fn test_unstable_sessions_keep_climbing() {
        let mut failures = 0;
        for expected in 1..=5 {
            failures = next_failure_count(failures, false);
            assert_eq!(failures, expected);
        }
        failures = next_failure_count(failures, true);
        assert_eq!(failures, 0);
        assert_eq!(next_failure_count(failures, false), 1);
    }

    #[test]
    fn test_subscription_mentions_every_program() {
        let request = subscription_request(&programs());
        let raw = serde_json::to_value(&request).unwrap();
        assert_eq!(raw["method"], "logsSubscribe");
        assert_eq!(raw["jsonrpc"], "2.0");
        let mentions = raw["params"][0]["mentions"].as_array().unwrap();
        assert_eq!(mentions.len(), 2);
        assert_eq!(mentions[0], "RaydiumProgram111");
        assert_eq!(mentions[1], "PumpProgram111");
    }

    #[test]
    fn test_marker_match_produces_event_with_source() {
        let raw = notification(&[
            "Program log: ray_log",
            "Program log: initialize2: InitializeInstruction2",
        ]);
        let event = parse_notification(&programs(), &raw).unwrap();
        assert_eq!(event.signature, "Sig111");
        assert_eq!(event.source, SourceProgram::Raydium);
        assert_eq!(event.logs.len(), 2);
    }

    #[test]
    fn test_second_source_marker_attributes_correctly() {
        let raw = notification(&["Program log: Instruction: Create"]);
        let event = parse_notification(&programs(), &raw).unwrap();
        assert_eq!(event.source, SourceProgram::PumpFun);
    }

    #[test]
    fn test_non_matching_logs_are_ignored() {
        let raw = notification(&["Program log: Instruction: Swap"]);
        assert!(parse_notification(&programs(), &raw).is_none());
    }

    #[test]
    fn test_subscription_confirmation_is_ignored() {
        let raw = r#"{"jsonrpc": "2.0", "id": 1, "result": 42}"#;
        assert!(parse_notification(&programs(), raw).is_none());
    }

    #[test]
    fn test_malformed_frame_is_discarded() {
        assert!(parse_notification(&programs(), "not json").is_none());
        assert!(parse_notification(
            &programs(),
            r#"{"method": "logsNotification"}"#
        )
        .is_none());
    }
}
