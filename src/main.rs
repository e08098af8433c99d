//! Main entry point: wire the stream manager, the worker pipeline, and the
//! operator channel together, then run until a shutdown signal.

use anyhow::{Context, Result};
use poolwatch::config::{Credentials, Settings, DEFAULT_SETTINGS_PATH};
use poolwatch::evaluator::{RetryPolicy, RiskCriteria, RiskEvaluator, RugCheckClient};
use poolwatch::notifier::{AlertSink, TelegramNotifier};
use poolwatch::pipeline::resolver::HeliusResolver;
use poolwatch::pipeline::{event_channel, EventPipeline};
use poolwatch::rate_limit::ApiRateLimiter;
use poolwatch::store::TokenStore;
use poolwatch::stream::{StreamConfig, StreamConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("poolwatch=info")),
        )
        .init();

    // .env is optional; real deployments set the environment directly
    let _ = dotenvy::dotenv();
    let credentials = Credentials::from_env().context("loading credentials")?;
    let settings = Settings::load(DEFAULT_SETTINGS_PATH).context("loading settings")?;
    let programs = settings.active_programs().context("resolving watched programs")?;
    info!(
        sources = programs.len(),
        max_concurrent = settings.max_concurrent_evaluations,
        "starting poolwatch"
    );

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .context("building HTTP client")?;

    let transaction_limiter = Arc::new(ApiRateLimiter::new(
        "transactions",
        settings.transaction_api_rps,
    ));
    let risk_limiter = Arc::new(ApiRateLimiter::new("rugcheck", settings.risk_api_rps));
    let telegram_limiter = Arc::new(ApiRateLimiter::new("telegram", settings.telegram_rps));

    let resolver = Arc::new(HeliusResolver::new(
        http.clone(),
        credentials.transaction_api_url(),
        transaction_limiter,
    ));
    let provider = Arc::new(RugCheckClient::new(
        http.clone(),
        RugCheckClient::DEFAULT_BASE_URL.to_string(),
        risk_limiter,
    ));
    let evaluator = Arc::new(RiskEvaluator::new(
        provider,
        RiskCriteria::from_settings(&settings),
        RetryPolicy::new(
            settings.risk_retry_attempts,
            Duration::from_millis(settings.risk_retry_base_delay_ms),
        ),
    ));
    let notifier = Arc::new(TelegramNotifier::new(
        http,
        credentials.telegram_bot_token.clone(),
        credentials.telegram_chat_id.clone(),
        telegram_limiter,
        settings.notify_retry_attempts,
        Duration::from_millis(settings.notify_retry_base_delay_ms),
        settings.send_token_image,
    ));
    let store = Arc::new(TokenStore::new(
        &settings.valid_tokens_path,
        &settings.rejected_tokens_path,
    ));

    let pipeline = Arc::new(EventPipeline::new(
        resolver,
        evaluator,
        Arc::clone(&notifier) as Arc<dyn AlertSink>,
        store,
        settings.max_concurrent_evaluations,
        settings.seen_signature_cache_size,
        Duration::from_secs(settings.shutdown_grace_secs),
    ));

    let manager = StreamConnectionManager::new(StreamConfig {
        url: credentials.websocket_url(),
        programs,
        ping_interval: Duration::from_secs(settings.ws_ping_interval_secs),
        ping_timeout: Duration::from_secs(settings.ws_ping_timeout_secs),
        backoff_floor: Duration::from_millis(settings.reconnect_floor_ms),
        backoff_cap: Duration::from_millis(settings.reconnect_cap_ms),
        max_reconnect_attempts: settings.max_reconnect_attempts,
    });

    let (event_tx, event_rx) = event_channel(settings.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    notifier
        .announce("🔔 *Poolwatch started* - monitoring for new liquidity pools...")
        .await;

    let mut stream_handle = tokio::spawn(manager.run(event_tx, shutdown_rx.clone()));
    let pipeline_handle = tokio::spawn(Arc::clone(&pipeline).run(event_rx, shutdown_rx));

    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            None
        }
        result = &mut stream_handle => match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(anyhow::Error::new(e).context("stream task panicked")),
        },
    };

    // Stop the producer first, then let the pipeline drain within its grace
    let _ = shutdown_tx.send(true);
    if !stream_handle.is_finished() {
        let _ = (&mut stream_handle).await;
    }
    let _ = pipeline_handle.await;

    notifier.announce("🛑 *Poolwatch stopped*").await;

    match fatal {
        Some(e) => {
            error!(error = %e, "exiting after fatal stream failure");
            Err(e)
        }
        None => {
            info!("shutdown complete");
            Ok(())
        }
    }
}
