//! Candidate detection loop.
//!
//! Every cycle walks all margin accounts of one exchange against a fresh
//! market snapshot and publishes a candidate fact for each account that looks
//! liquidatable. Nothing survives from one cycle to the next.

use alloy::primitives::Address;
use anyhow::Result;
use liquidator_bus::{CandidateFact, CandidatePublisher};
use liquidator_chain::StateFetcher;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::config;
use crate::error::LiquidationError;
use crate::market_state::{evaluate_account, load_markets};
use crate::risk::RiskEvaluator;

/// Detector configuration.
/// Uses values from global BotConfig by default.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Exchange whose accounts are scanned
    pub exchange: Address,
    /// Time between scans
    pub interval: Duration,
}

impl DetectorConfig {
    pub fn new(exchange: Address) -> Self {
        Self {
            exchange,
            interval: config().scanner.interval(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Summary of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Accounts returned by the enumeration
    pub accounts: usize,
    /// Accounts that received a verdict
    pub evaluated: usize,
    /// Candidates published
    pub candidates: usize,
    /// Accounts the evaluator could not judge
    pub skipped: usize,
    /// Accounts referencing markets the exchange does not list
    pub inconsistent: usize,
    pub elapsed: Duration,
}

enum Scan {
    ExchangeNotFound,
    Completed {
        candidates: Vec<CandidateFact>,
        report: ScanReport,
    },
}

/// Periodic scanner for one exchange.
pub struct Detector {
    fetcher: Arc<dyn StateFetcher>,
    publisher: Arc<dyn CandidatePublisher>,
    evaluator: Arc<dyn RiskEvaluator>,
    config: DetectorConfig,
}

impl Detector {
    pub fn new(
        fetcher: Arc<dyn StateFetcher>,
        publisher: Arc<dyn CandidatePublisher>,
        evaluator: Arc<dyn RiskEvaluator>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            fetcher,
            publisher,
            evaluator,
            config,
        }
    }

    /// Scan on a fixed interval until `shutdown` flips to `true`.
    ///
    /// The first scan starts immediately. A failed cycle is logged and the
    /// next tick tries again. A cycle interrupted by shutdown publishes nothing.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            exchange = %self.config.exchange,
            interval_secs = self.config.interval.as_secs(),
            "Starting detection loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }

            let scan = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown during scan, discarding cycle");
                    break;
                }
                scan = self.scan() => scan,
            };

            match scan {
                Ok(Scan::Completed { candidates, report }) => {
                    // Publication runs to completion even if shutdown arrives now
                    if let Err(e) = self.publish(&candidates).await {
                        error!(error = %e, count = candidates.len(), "Failed to publish candidates");
                        continue;
                    }
                    log_report(&report);
                }
                Ok(Scan::ExchangeNotFound) => {
                    warn!(exchange = %self.config.exchange, "Exchange not found, skipping cycle");
                }
                Err(e) => {
                    warn!(exchange = %self.config.exchange, error = %e, "Scan failed, retrying next cycle");
                }
            }
        }

        info!("Detection loop stopped");
        Ok(())
    }

    /// Run one full cycle and publish its candidates.
    ///
    /// Returns `None` when the exchange does not exist.
    pub async fn scan_once(&self) -> Result<Option<ScanReport>> {
        match self.scan().await? {
            Scan::ExchangeNotFound => Ok(None),
            Scan::Completed { candidates, report } => {
                self.publish(&candidates).await?;
                log_report(&report);
                Ok(Some(report))
            }
        }
    }

    async fn publish(&self, candidates: &[CandidateFact]) -> Result<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        self.publisher.publish_batch(candidates).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(exchange = %self.config.exchange))]
    async fn scan(&self) -> Result<Scan, LiquidationError> {
        let started = Instant::now();
        let fetcher = self.fetcher.as_ref();

        let Some(exchange) = fetcher
            .get_exchange(self.config.exchange)
            .await
            .map_err(LiquidationError::Fetch)?
        else {
            return Ok(Scan::ExchangeNotFound);
        };

        let (state, accounts) = tokio::try_join!(load_markets(fetcher, exchange), async {
            fetcher
                .get_all_margin_accounts(self.config.exchange)
                .await
                .map_err(LiquidationError::Fetch)
        })?;

        debug!(
            markets = state.markets.len(),
            price_feeds = state.price_feeds.len(),
            accounts = accounts.len(),
            "Loaded cycle snapshot"
        );

        let now = chrono::Utc::now().timestamp();
        let mut report = ScanReport {
            accounts: accounts.len(),
            ..Default::default()
        };
        let mut seen = HashSet::with_capacity(accounts.len());
        let mut candidates = Vec::new();

        for account in &accounts {
            if account.exchange != self.config.exchange {
                debug!(account = %account.address, exchange = %account.exchange, "Account belongs to another exchange");
                continue;
            }
            if !seen.insert(account.address) {
                continue;
            }

            match evaluate_account(self.evaluator.as_ref(), account, &state, now) {
                Ok(verdict) => {
                    report.evaluated += 1;
                    if verdict.can_liquidate {
                        info!(
                            account = %account.address,
                            owner = %account.owner,
                            equity = verdict.equity,
                            maintenance = verdict.maintenance_requirement,
                            in_liquidation = verdict.in_liquidation,
                            "Liquidation candidate"
                        );
                        candidates.push(CandidateFact::new(account.address, account.exchange, account.owner));
                    }
                }
                Err(e) if e.is_data_inconsistency() => {
                    report.inconsistent += 1;
                    error!(account = %account.address, error = %e, "Inconsistent account state");
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(account = %account.address, error = %e, "Failed to evaluate account");
                }
            }
        }

        report.candidates = candidates.len();
        report.elapsed = started.elapsed();
        Ok(Scan::Completed { candidates, report })
    }
}

fn log_report(report: &ScanReport) {
    info!(
        accounts = report.accounts,
        evaluated = report.evaluated,
        candidates = report.candidates,
        skipped = report.skipped,
        inconsistent = report.inconsistent,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Scan complete"
    );
}
