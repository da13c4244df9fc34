use crate::{
    config::PaymentNetwork,
    error::Result,
    models::BalanceReading,
    services::{
        balance::{format_balance, BalanceSource, Erc20BalanceSource},
        clock::{Clock, SystemClock},
        funding::{poll_until, Observer, DEFAULT_CHAIN_TIMEOUT},
    },
};
use chrono::{DateTime, Utc};
use ethers::{
    types::{Address, U256},
    utils::to_checksum,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const USDC_DECIMALS: u32 = 6;

/// One cent of USDC, in raw units.
pub const MIN_USDC_BALANCE: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StablecoinBalance {
    pub address: String,
    pub network: String,
    pub reading: BalanceReading,
    /// Formatted balance, with unknown readings shown as zero.
    pub formatted: String,
    /// Whether the balance, treating unknown as zero, covers [`MIN_USDC_BALANCE`].
    pub has_minimum: bool,
    pub checked_at: DateTime<Utc>,
}

/// USDC balance on the payment network, with read failures downgraded to "unknown".
pub struct StablecoinMonitor {
    network: String,
    source: Arc<dyn BalanceSource>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl StablecoinMonitor {
    pub fn for_network(network: PaymentNetwork, rpc_url: &str) -> Result<Self> {
        let source = Erc20BalanceSource::new(
            network.as_str(),
            rpc_url,
            network.usdc_address(),
            USDC_DECIMALS,
        )?;
        Ok(Self::with_source(Arc::new(source)))
    }

    /// Uses `source` as the USDC reader; the source's own decimals are ignored.
    pub fn with_source(source: Arc<dyn BalanceSource>) -> Self {
        Self {
            network: source.chain().to_string(),
            source,
            timeout: DEFAULT_CHAIN_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn check(&self, address: Address) -> StablecoinBalance {
        let reading = match tokio::time::timeout(self.timeout, self.source.balance_of(address)).await {
            Ok(Ok(raw)) => BalanceReading::Verified(raw),
            Ok(Err(e)) => {
                tracing::warn!("USDC balance read failed, treating as zero: {}", e);
                BalanceReading::Unknown { reason: e.to_string() }
            }
            Err(_) => {
                tracing::warn!("USDC balance read timed out, treating as zero");
                BalanceReading::Unknown {
                    reason: format!("timed out after {}ms", self.timeout.as_millis()),
                }
            }
        };

        let effective = reading.or_zero();
        StablecoinBalance {
            address: to_checksum(&address, None),
            network: self.network.clone(),
            formatted: format_balance(effective, USDC_DECIMALS),
            has_minimum: effective >= U256::from(MIN_USDC_BALANCE),
            reading,
            checked_at: Utc::now(),
        }
    }

    pub async fn wait_for_funding(
        &self,
        address: Address,
        poll_interval: Duration,
        max_wait: Duration,
        observer: Option<Observer<'_, StablecoinBalance>>,
    ) -> Result<StablecoinBalance> {
        tracing::info!(
            "Waiting up to {}s for {} USDC on {}",
            max_wait.as_secs(),
            format_balance(U256::from(MIN_USDC_BALANCE), USDC_DECIMALS),
            self.network
        );

        poll_until(
            self.clock.as_ref(),
            address,
            poll_interval,
            max_wait,
            || self.check(address),
            |balance: &StablecoinBalance| balance.has_minimum,
            observer,
        )
        .await
    }
}
