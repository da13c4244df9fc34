use crate::{
    error::{Result, X402Error},
    models::{BalanceSample, FundingResult},
    services::{
        balance::{format_balance, BalanceSource},
        clock::{Clock, SystemClock},
    },
};
use chrono::Utc;
use ethers::{
    types::{Address, U256},
    utils::to_checksum,
};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CHAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Callback invoked with every poll result while waiting for funds.
pub type Observer<'a, T> = &'a (dyn Fn(&T) + Send + Sync);

/// Polls one or more balance sources for a single asset.
pub struct FundingMonitor {
    sources: BTreeMap<String, Arc<dyn BalanceSource>>,
    decimals: Option<u32>,
    chain_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl FundingMonitor {
    pub fn new(chain_timeout: Duration) -> Self {
        Self {
            sources: BTreeMap::new(),
            decimals: None,
            chain_timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a source. All sources must report the same asset scale.
    pub fn with_source(mut self, source: Arc<dyn BalanceSource>) -> Result<Self> {
        let decimals = source.decimals();
        match self.decimals {
            Some(existing) if existing != decimals => {
                return Err(X402Error::ConfigError(format!(
                    "{} reports {} decimals, monitor already tracks {}",
                    source.chain(),
                    decimals,
                    existing
                )));
            }
            _ => self.decimals = Some(decimals),
        }

        self.sources.insert(source.chain().to_string(), source);
        Ok(self)
    }

    pub fn chains(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Reads every requested chain concurrently. Never fails: broken chains become error samples.
    pub async fn check_balance(&self, address: Address, chains: &[&str]) -> FundingResult {
        self.check_against(address, chains, U256::one()).await
    }

    /// Polls until any one chain holds at least `min_balance` or `max_wait` runs out.
    pub async fn wait_for_funding(
        &self,
        address: Address,
        min_balance: U256,
        chains: &[&str],
        poll_interval: Duration,
        max_wait: Duration,
        observer: Option<Observer<'_, FundingResult>>,
    ) -> Result<FundingResult> {
        tracing::info!(
            "Waiting up to {}s for {} to hold {} on {:?}",
            max_wait.as_secs(),
            to_checksum(&address, None),
            format_balance(min_balance, self.decimals.unwrap_or(0)),
            chains
        );

        poll_until(
            self.clock.as_ref(),
            address,
            poll_interval,
            max_wait,
            || self.check_against(address, chains, min_balance),
            |result: &FundingResult| result.any_chain_meets(min_balance),
            observer,
        )
        .await
    }

    async fn check_against(&self, address: Address, chains: &[&str], minimum: U256) -> FundingResult {
        let samples = join_all(
            chains
                .iter()
                .map(|chain| self.sample_chain(chain, address, minimum)),
        )
        .await;

        let decimals = self.decimals.unwrap_or(0);
        let mut total_raw = U256::zero();
        let mut has_funds = false;
        let mut balances = BTreeMap::new();

        for sample in samples {
            if sample.is_ok() {
                total_raw = total_raw.saturating_add(sample.raw);
                has_funds |= sample.has_funds;
            }
            balances.insert(sample.chain.clone(), sample);
        }

        FundingResult {
            address: to_checksum(&address, None),
            balances,
            total_formatted: format_balance(total_raw, decimals),
            total_raw,
            has_funds,
            checked_at: Utc::now(),
        }
    }

    async fn sample_chain(&self, chain: &str, address: Address, minimum: U256) -> BalanceSample {
        let Some(source) = self.sources.get(chain) else {
            return BalanceSample::failed(chain, format!("no balance source for {}", chain));
        };

        match tokio::time::timeout(self.chain_timeout, source.balance_of(address)).await {
            Ok(Ok(raw)) => {
                tracing::debug!("{} balance on {}: {}", address, chain, raw);
                BalanceSample {
                    chain: chain.to_string(),
                    formatted: format_balance(raw, source.decimals()),
                    raw,
                    has_funds: !raw.is_zero() && raw >= minimum,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Balance check failed on {}: {}", chain, e);
                BalanceSample::failed(chain, e.to_string())
            }
            Err(_) => {
                tracing::warn!("Balance check on {} timed out", chain);
                BalanceSample::failed(
                    chain,
                    format!("timed out after {}ms", self.chain_timeout.as_millis()),
                )
            }
        }
    }
}

/// Shared poll loop: probe, report, stop when `done`, sleep, repeat until the deadline.
///
/// A probe still running when the deadline hits is abandoned.
pub(crate) async fn poll_until<T, P, Fut, D>(
    clock: &dyn Clock,
    address: Address,
    poll_interval: Duration,
    max_wait: Duration,
    mut probe: P,
    done: D,
    observer: Option<Observer<'_, T>>,
) -> Result<T>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = T>,
    D: Fn(&T) -> bool,
{
    let started = clock.now();
    let timeout = |waited: Duration| X402Error::FundingTimeout {
        address: to_checksum(&address, None),
        waited,
    };

    let mut polls = 0u32;
    loop {
        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed > max_wait {
            return Err(timeout(elapsed));
        }

        let remaining = max_wait - elapsed;
        let outcome = tokio::select! {
            biased;
            value = probe() => Some(value),
            _ = clock.sleep(remaining) => None,
        };
        let Some(value) = outcome else {
            tracing::warn!("Deadline hit while a balance poll was in flight");
            return Err(timeout(clock.now().saturating_duration_since(started)));
        };
        polls += 1;

        if let Some(observer) = observer {
            observer(&value);
        }

        if done(&value) {
            tracing::info!("Funding threshold reached after {} poll(s)", polls);
            return Ok(value);
        }

        let elapsed = clock.now().saturating_duration_since(started);
        if elapsed >= max_wait {
            return Err(timeout(elapsed));
        }
        clock.sleep(poll_interval.min(max_wait - elapsed)).await;
    }
}
