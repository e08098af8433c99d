//! Event pipeline: bounded queue consumer feeding semaphore-gated workers.
//!
//! One consumer loop pulls stream events, de-duplicates recently seen
//! signatures, and spawns one task per event. Within a task the steps run
//! strictly sequentially (resolve → extract → validate → evaluate → persist
//! → notify); across tasks there is no ordering guarantee.

pub mod extractor;
pub mod resolver;

use crate::evaluator::RiskEvaluator;
use crate::notifier::AlertSink;
use crate::store::TokenStore;
use crate::types::{StreamEvent, TokenCandidate};
use crate::validator::is_valid_mint_address;
use extractor::extract_mint;
use resolver::TransactionSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Cadence of the periodic counter report.
const REPORT_INTERVAL: Duration = Duration::from_secs(60);
/// How long a seen signature stays in the de-duplication cache.
const SEEN_TTL: Duration = Duration::from_secs(600);

/// Create the bounded event queue between the stream manager and the
/// pipeline. The producer awaits when the queue is full; a missed pool is a
/// missed opportunity, so nothing is dropped.
pub fn event_channel(
    capacity: usize,
) -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(capacity.max(1))
}

/// Running totals, logged periodically and inspectable from tests.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub received: AtomicU64,
    pub discarded: AtomicU64,
    pub passed: AtomicU64,
    pub rejected: AtomicU64,
}

impl PipelineCounters {
    fn report(&self) {
        info!(
            received = self.received.load(Ordering::Relaxed),
            discarded = self.discarded.load(Ordering::Relaxed),
            passed = self.passed.load(Ordering::Relaxed),
            rejected = self.rejected.load(Ordering::Relaxed),
            "pipeline counters"
        );
    }
}

/// The worker-pool half of the system.
pub struct EventPipeline {
    resolver: Arc<dyn TransactionSource>,
    evaluator: Arc<RiskEvaluator>,
    sink: Arc<dyn AlertSink>,
    store: Arc<TokenStore>,
    /// Concurrency controller: caps simultaneous in-flight evaluations
    semaphore: Arc<Semaphore>,
    seen_signatures: moka::future::Cache<String, ()>,
    shutdown_grace: Duration,
    pub counters: Arc<PipelineCounters>,
}

impl EventPipeline {
    pub fn new(
        resolver: Arc<dyn TransactionSource>,
        evaluator: Arc<RiskEvaluator>,
        sink: Arc<dyn AlertSink>,
        store: Arc<TokenStore>,
        max_concurrent_evaluations: usize,
        seen_cache_size: u64,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            resolver,
            evaluator,
            sink,
            store,
            semaphore: Arc::new(Semaphore::new(max_concurrent_evaluations.max(1))),
            seen_signatures: moka::future::Cache::builder()
                .max_capacity(seen_cache_size.max(1))
                .time_to_live(SEEN_TTL)
                .build(),
            shutdown_grace,
            counters: Arc::new(PipelineCounters::default()),
        }
    }

    /// Consume the queue until it closes or shutdown is signaled, then drain
    /// in-flight work within the grace period and abort the rest.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<StreamEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut report_timer = tokio::time::interval(REPORT_INTERVAL);
        report_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        report_timer.reset();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A closed shutdown channel means the process is tearing
                    // down; treat it the same as an explicit signal
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown signaled, pipeline stops accepting events");
                        break;
                    }
                }
                _ = report_timer.tick() => {
                    self.counters.report();
                }
                maybe_event = events.recv() => match maybe_event {
                    Some(event) => {
                        self.counters.received.fetch_add(1, Ordering::Relaxed);
                        if self.seen_signatures.contains_key(&event.signature) {
                            debug!(signature = %event.signature, "duplicate signature, skipping");
                            continue;
                        }
                        self.seen_signatures
                            .insert(event.signature.clone(), ())
                            .await;

                        // Reap completed tasks so the set stays small
                        while tasks.try_join_next().is_some() {}

                        // The (N+1)-th ready event waits here for a slot;
                        // downstream calls are rate-limited and uncontrolled
                        // concurrency would blow their budgets. Shutdown must
                        // still be observable while every permit is held.
                        let permit = loop {
                            tokio::select! {
                                acquired = Arc::clone(&self.semaphore).acquire_owned() => {
                                    break acquired.ok();
                                }
                                changed = shutdown.changed() => {
                                    if changed.is_err() || *shutdown.borrow() {
                                        break None;
                                    }
                                }
                            }
                        };
                        let Some(permit) = permit else {
                            info!("shutdown signaled while waiting for an evaluation slot");
                            break;
                        };
                        let pipeline = Arc::clone(&self);
                        tasks.spawn(async move {
                            pipeline.process_event(event).await;
                            drop(permit);
                        });
                    }
                    None => {
                        debug!("event queue closed");
                        break;
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "draining in-flight evaluations");
        }
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("grace period elapsed, aborting remaining evaluations");
            tasks.shutdown().await;
        }
        self.counters.report();
    }

    /// One event, end to end. Every terminal outcome is logged; only
    /// pass/fail evaluations reach the store and the operator channel.
    #[instrument(skip(self, event), fields(signature = %event.signature, source = %event.source))]
    async fn process_event(&self, event: StreamEvent) {
        let Some(detail) = self.resolver.fetch(&event.signature).await else {
            // No internal retry at the resolver: a missed fetch is cheap to
            // skip, and retrying here would hammer a degraded dependency
            warn!("transaction unavailable, event discarded");
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let Some(mint) = extract_mint(&detail, event.source) else {
            debug!("no candidate mint in transaction, event discarded");
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if !is_valid_mint_address(&mint) {
            warn!(mint = %mint, "extracted mint failed validation, event discarded");
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let candidate = TokenCandidate {
            mint,
            source: event.source,
        };
        info!(mint = %candidate.mint, "evaluating candidate");
        let result = self.evaluator.evaluate(&candidate).await;

        if result.passed {
            self.counters.passed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        }

        match self.store.record(&result.mint, result.passed).await {
            Ok(true) => {}
            Ok(false) => debug!(mint = %result.mint, "mint was already recorded"),
            Err(e) => error!(mint = %result.mint, error = %e, "failed to persist evaluation"),
        }

        self.sink.notify(&result).await;
    }
}
