//! Per-feed challenger loop
//!
//! Maintains the sliding block cursor, drives periodic scans, applies the
//! challengeability predicate, and dispatches detached challenge tasks.

use crate::events::PokeEvent;
use crate::feed::FeedProvider;
use crate::filter;
use crate::metrics::Metrics;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Assumed block cadence, used only to bound the first-tick lookback window.
pub const SLOT_PERIOD_SEC: u64 = 12;

/// Scan cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Earliest block number worth scanning for pokes that could still be
/// challenged, given the latest block and the challenge period.
fn earliest_scan_block(latest: u64, period: u16) -> u64 {
    latest.saturating_sub(u64::from(period) / SLOT_PERIOD_SEC)
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// One feed's watch pipeline. Each feed runs its own independent instance;
/// pipelines share only the provider and the metrics handle.
pub struct Challenger<P> {
    address: Address,
    provider: Arc<P>,
    last_processed_block: Option<u64>,
    /// Poke block numbers with a challenge currently in flight. Prevents a
    /// second submission for the same poke while its success event has not
    /// appeared on chain yet.
    in_flight: Arc<Mutex<HashSet<u64>>>,
    tasks: JoinSet<()>,
    metrics: Metrics,
    shutdown: CancellationToken,
}

impl<P> Challenger<P>
where
    P: FeedProvider + 'static,
{
    /// Create a pipeline for `address`. A non-zero `from_block` seeds the
    /// scan cursor; otherwise the first tick derives a lookback window from
    /// the challenge period.
    pub fn new(
        address: Address,
        provider: Arc<P>,
        from_block: Option<u64>,
        metrics: Metrics,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            address,
            provider,
            last_processed_block: from_block,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: JoinSet::new(),
            metrics,
            shutdown,
        }
    }

    /// Decide whether a poke can still be challenged: its block must sit
    /// inside the challenge window and its signature must fail on-chain
    /// verification. Any error makes the poke non-challengeable.
    async fn is_poke_challengeable(&self, poke: &PokeEvent, period: u16) -> bool {
        let block = match self
            .provider
            .block_by_number(&self.shutdown, poke.block_number)
            .await
        {
            Ok(block) => block,
            Err(err) => {
                error!(
                    "Failed to get block by number {} with error: {err}",
                    poke.block_number
                );
                return false;
            }
        };

        let challengeable_since = now_unix().saturating_sub(u64::from(period));
        if block.timestamp < challengeable_since {
            info!(
                "Poke from block {} is not challengeable by time",
                poke.block_number
            );
            return false;
        }

        let valid = match self
            .provider
            .is_poke_signature_valid(&self.shutdown, self.address, poke)
            .await
        {
            Ok(valid) => valid,
            Err(err) => {
                error!("Failed to verify OpPoked signature with error: {err}");
                return false;
            }
        };
        debug!("Is opPoke signature valid? {valid}");

        !valid
    }

    /// Spawn a detached task that challenges `poke`, unless one is already
    /// in flight for its block.
    async fn dispatch_challenge(&mut self, poke: PokeEvent) {
        let block_number = poke.block_number;
        if !self.in_flight.lock().await.insert(block_number) {
            debug!("Challenge for block {block_number} is already in flight");
            return;
        }
        warn!("Challenging OpPoked event from block {block_number}");

        let address = self.address;
        let provider = Arc::clone(&self.provider);
        let metrics = self.metrics.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = self.shutdown.clone();
        self.tasks.spawn(async move {
            let from = provider.sender();
            match provider.challenge_poke(&cancel, address, &poke).await {
                Ok(tx_hash) => {
                    info!("Challenge transaction hash: 0x{tx_hash:x}");
                    metrics.record_challenge(address, from, tx_hash);
                }
                Err(err) => {
                    error!(
                        "Failed to challenge OpPoked event from block {block_number} with error: {err}"
                    );
                    metrics.record_error(address, from, &err.to_string());
                }
            }
            in_flight.lock().await.remove(&block_number);
        });
    }

    /// One scan pass over the window since the last processed block.
    async fn tick(&mut self) -> Result<()> {
        // Reap challenge tasks finished since the previous tick.
        while self.tasks.try_join_next().is_some() {}

        let latest = self
            .provider
            .latest_block(&self.shutdown)
            .await
            .context("failed to get latest block number")?;
        let period = self
            .provider
            .challenge_period(&self.shutdown, self.address)
            .await
            .context("failed to get challenge period")?;
        let from = self
            .last_processed_block
            .unwrap_or_else(|| earliest_scan_block(latest, period));
        debug!("[{}] Block number to start with: {from}", self.address);

        let pokes = self
            .provider
            .pokes_in_range(&self.shutdown, self.address, from, latest)
            .await
            .context("failed to get OpPoked events")?;

        // The cursor advances as soon as the poke fetch lands; a failure in
        // the rest of the tick will not re-scan this window.
        self.last_processed_block = Some(latest);
        self.metrics
            .set_last_scanned_block(self.address, self.provider.sender(), latest);

        if pokes.is_empty() {
            debug!("No logs found");
            return Ok(());
        }

        let successes = self
            .provider
            .successful_challenges_in_range(&self.shutdown, self.address, from, latest)
            .await
            .context("failed to get OpPokeChallengedSuccessfully events")?;

        let candidates = filter::unchallenged(pokes, successes);

        for poke in candidates {
            if !self.is_poke_challengeable(&poke, period).await {
                debug!(
                    "Event from block {} is not challengeable",
                    poke.block_number
                );
                continue;
            }
            self.dispatch_challenge(poke).await;
        }

        Ok(())
    }

    /// Run the pipeline: one tick immediately, then every [`TICK_INTERVAL`]
    /// until shutdown. Tick errors are logged and counted, never fatal.
    pub async fn run(mut self) -> Result<()> {
        info!("Monitoring contract {}", self.address);

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Terminate challenger for {}", self.address);
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        // A tick interrupted by shutdown is not an error.
                        if self.shutdown.is_cancelled() {
                            info!("Terminate challenger for {}", self.address);
                            break;
                        }
                        error!("Failed to execute tick with error: {err:#}");
                        self.metrics.record_error(
                            self.address,
                            self.provider.sender(),
                            &format!("{err:#}"),
                        );
                    }
                }
            }
        }

        // Let in-flight challenges finish and publish their metrics.
        while self.tasks.join_next().await.is_some() {}
        Ok(())
    }
}
