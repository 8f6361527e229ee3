//! Liquidation execution.
//!
//! A candidate fact only says an account looked liquidatable at some point.
//! The executor re-reads the account and the markets, recomputes the verdict,
//! and submits only if the fresh verdict still says so. Redelivered or stale
//! facts therefore cost a read, never a wrong liquidation.

use alloy::primitives::Address;
use liquidator_bus::{CandidateConsumer, CandidateFact, Delivery};
use liquidator_chain::{LiquidationRequest, Signature, StateFetcher, SubmitError, TransactionSubmitter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::config;
use crate::error::LiquidationError;
use crate::market_state::{evaluate_account, liquidation_refs, load_market_state};
use crate::risk::RiskEvaluator;

/// Executor configuration.
/// Uses values from global BotConfig by default.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Margin account receiving liquidated positions
    pub liquidator_account: Address,
    /// Pause after a transient failure
    pub retry_backoff: Duration,
    /// Failed deliveries of one fact before it is acked and dropped
    pub max_attempts: u32,
}

impl ExecutorConfig {
    pub fn new(liquidator_account: Address) -> Self {
        let cfg = config();
        Self {
            liquidator_account,
            retry_backoff: cfg.executor.retry_backoff(),
            max_attempts: cfg.executor.max_attempts,
        }
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

/// How a single fact was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The account no longer exists
    AccountNotFound,
    /// The account belongs to a different exchange than the fact claims
    ExchangeMismatch { actual: Address },
    /// The exchange no longer exists
    ExchangeNotFound,
    /// Fresh verdict says the account is fine
    Healthy,
    Liquidated { signature: Signature },
    /// The ledger refused (typically someone else liquidated first)
    Rejected { reason: String },
}

/// Counters for one consumption loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub processed: u64,
    pub liquidated: u64,
    pub rejected: u64,
    pub discarded: u64,
    pub malformed: u64,
    pub inconsistent: u64,
    /// Facts whose account could not be evaluated (bad or stale price)
    pub unevaluable: u64,
    pub retried: u64,
    /// Facts dropped after `max_attempts` failed deliveries
    pub abandoned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Ack,
    Nack,
}

/// Re-verifying liquidation executor.
pub struct Executor {
    fetcher: Arc<dyn StateFetcher>,
    submitter: Arc<dyn TransactionSubmitter>,
    evaluator: Arc<dyn RiskEvaluator>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        fetcher: Arc<dyn StateFetcher>,
        submitter: Arc<dyn TransactionSubmitter>,
        evaluator: Arc<dyn RiskEvaluator>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            fetcher,
            submitter,
            evaluator,
            config,
        }
    }

    /// Handle one candidate fact against fresh ledger state.
    #[instrument(skip(self), fields(account = %fact.account, exchange = %fact.exchange))]
    pub async fn on_candidate(&self, fact: &CandidateFact) -> Result<ExecutionOutcome, LiquidationError> {
        let fetcher = self.fetcher.as_ref();

        let Some(account) = fetcher
            .get_margin_account(fact.exchange, fact.account)
            .await
            .map_err(LiquidationError::Fetch)?
        else {
            debug!("Account not found, discarding");
            return Ok(ExecutionOutcome::AccountNotFound);
        };

        if account.exchange != fact.exchange {
            warn!(actual = %account.exchange, "Account belongs to another exchange, discarding");
            return Ok(ExecutionOutcome::ExchangeMismatch {
                actual: account.exchange,
            });
        }

        let Some(state) = load_market_state(fetcher, fact.exchange).await? else {
            debug!("Exchange not found, discarding");
            return Ok(ExecutionOutcome::ExchangeNotFound);
        };

        if account.in_liquidation {
            info!("Account already in liquidation, continuing it");
        } else {
            let now = chrono::Utc::now().timestamp();
            let verdict = evaluate_account(self.evaluator.as_ref(), &account, &state, now)?;
            if !verdict.can_liquidate {
                debug!(
                    equity = verdict.equity,
                    maintenance = verdict.maintenance_requirement,
                    health_factor = verdict.health_factor,
                    "Account healthy on re-check"
                );
                return Ok(ExecutionOutcome::Healthy);
            }
        }

        let (markets, price_feeds) = liquidation_refs(&account, &state.markets)?;
        let request = LiquidationRequest {
            account: account.address,
            exchange: account.exchange,
            owner: account.owner,
            liquidator: self.submitter.liquidator(),
            liquidator_account: self.config.liquidator_account,
            markets,
            price_feeds,
        };

        match self.submitter.submit_liquidation(&request).await {
            Ok(signature) => {
                info!(signature = %signature, owner = %account.owner, "Account liquidated");
                Ok(ExecutionOutcome::Liquidated { signature })
            }
            Err(SubmitError::Rejected(reason)) => {
                info!(reason = %reason, "Liquidation rejected by ledger");
                Ok(ExecutionOutcome::Rejected { reason })
            }
            Err(SubmitError::Transport(e)) => Err(LiquidationError::Submission(e)),
        }
    }

    /// Consume facts one at a time until `shutdown` flips to `true`.
    ///
    /// Shutdown is honoured only between facts; a fact being processed always
    /// reaches a verdict and an ack or nack.
    pub async fn run<C: CandidateConsumer>(
        &self,
        mut consumer: C,
        mut shutdown: watch::Receiver<bool>,
    ) -> ExecutorStats {
        info!(liquidator = %self.submitter.liquidator(), "Starting execution loop");
        let mut stats = ExecutorStats::default();
        let mut attempts: HashMap<(u32, u64), u32> = HashMap::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                next = consumer.next() => next,
            };

            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(error = %e, "Failed to read from bus");
                    if self.backoff(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let mut disposition = self.process(&delivery, &mut stats).await;
            let key = (delivery.partition, delivery.offset);
            if disposition == Disposition::Nack {
                let tries = attempts.entry(key).or_insert(0);
                *tries += 1;
                if *tries >= self.config.max_attempts {
                    stats.abandoned += 1;
                    error!(
                        partition = delivery.partition,
                        offset = delivery.offset,
                        attempts = *tries,
                        "Candidate keeps failing, dropping it"
                    );
                    disposition = Disposition::Ack;
                }
            }
            if disposition == Disposition::Ack {
                attempts.remove(&key);
            }

            let result = match disposition {
                Disposition::Ack => consumer.ack(&delivery).await,
                Disposition::Nack => consumer.nack(&delivery).await,
            };
            if let Err(e) = result {
                warn!(partition = delivery.partition, offset = delivery.offset, error = %e, "Failed to settle delivery");
            }

            if disposition == Disposition::Nack && self.backoff(&mut shutdown).await {
                break;
            }
        }

        info!(
            processed = stats.processed,
            liquidated = stats.liquidated,
            rejected = stats.rejected,
            discarded = stats.discarded,
            "Execution loop stopped"
        );
        stats
    }

    async fn process(&self, delivery: &Delivery, stats: &mut ExecutorStats) -> Disposition {
        stats.processed += 1;

        let fact = match CandidateFact::decode(&delivery.payload) {
            Ok(fact) => fact,
            Err(e) => {
                stats.malformed += 1;
                warn!(partition = delivery.partition, offset = delivery.offset, error = %e, "Skipping malformed candidate");
                return Disposition::Ack;
            }
        };

        match self.on_candidate(&fact).await {
            Ok(ExecutionOutcome::Liquidated { .. }) => {
                stats.liquidated += 1;
                Disposition::Ack
            }
            Ok(ExecutionOutcome::Rejected { .. }) => {
                stats.rejected += 1;
                Disposition::Ack
            }
            Ok(_) => {
                stats.discarded += 1;
                Disposition::Ack
            }
            Err(e) if e.is_data_inconsistency() => {
                stats.inconsistent += 1;
                error!(account = %fact.account, error = %e, "Inconsistent ledger state, dropping candidate");
                Disposition::Ack
            }
            Err(e) if !e.is_transient() => {
                // The next scan flags the account again once its prices recover
                stats.unevaluable += 1;
                warn!(account = %fact.account, error = %e, "Cannot evaluate account, dropping candidate");
                Disposition::Ack
            }
            Err(e) => {
                stats.retried += 1;
                warn!(account = %fact.account, error = %e, "Candidate failed, handing back for redelivery");
                Disposition::Nack
            }
        }
    }

    /// Sleep for the retry backoff. Returns `true` if shutdown arrived meanwhile.
    async fn backoff(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => true,
            _ = tokio::time::sleep(self.config.retry_backoff) => false,
        }
    }
}
