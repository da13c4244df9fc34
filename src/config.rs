use anyhow::{bail, Context, Result};
use ethers::types::Address;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::ledger::DEFAULT_LEDGER_CAPACITY;

/// Network the agent pays on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentNetwork {
    Base,
    BaseSepolia,
}

impl PaymentNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentNetwork::Base => "base",
            PaymentNetwork::BaseSepolia => "base-sepolia",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            PaymentNetwork::Base => 8453,
            PaymentNetwork::BaseSepolia => 84532,
        }
    }

    /// Circle's USDC deployment on this network.
    pub fn usdc_address(&self) -> Address {
        let literal = match self {
            PaymentNetwork::Base => "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
            PaymentNetwork::BaseSepolia => "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        };
        literal.parse().expect("valid USDC address literal")
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            PaymentNetwork::Base => "https://mainnet.base.org",
            PaymentNetwork::BaseSepolia => "https://sepolia.base.org",
        }
    }
}

impl FromStr for PaymentNetwork {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "base" | "base-mainnet" | "eip155:8453" => Ok(PaymentNetwork::Base),
            "base-sepolia" | "sepolia" | "eip155:84532" => Ok(PaymentNetwork::BaseSepolia),
            other => bail!("Unknown network: {}", other),
        }
    }
}

impl std::fmt::Display for PaymentNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub network: PaymentNetwork,

    // Paid API
    pub api_url: String,
    pub max_payment_usd: Decimal,

    // Balance sources
    pub base_rpc_url: String,
    pub base_sepolia_rpc_url: String,
    pub eth_rpc_url: Option<String>,
    pub balance_timeout: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,

    // Local state
    pub data_dir: PathBuf,
    pub ledger_capacity: usize,
    pub private_key_override: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let network: PaymentNetwork = var_or("X402_NETWORK", "base")
            .parse()
            .context("Invalid X402_NETWORK")?;

        let config = Self {
            network,
            api_url: lookup("X402_API_URL").context("X402_API_URL required")?,
            max_payment_usd: Decimal::from_str(&var_or("X402_MAX_PAYMENT_USD", "0.10"))
                .context("Invalid X402_MAX_PAYMENT_USD")?,

            base_rpc_url: var_or("BASE_RPC_URL", PaymentNetwork::Base.default_rpc_url()),
            base_sepolia_rpc_url: var_or(
                "BASE_SEPOLIA_RPC_URL",
                PaymentNetwork::BaseSepolia.default_rpc_url(),
            ),
            eth_rpc_url: lookup("ETH_RPC_URL"),
            balance_timeout: Duration::from_secs(
                var_or("X402_BALANCE_TIMEOUT_SECS", "10")
                    .parse()
                    .context("Invalid X402_BALANCE_TIMEOUT_SECS")?,
            ),
            poll_interval: Duration::from_secs(
                var_or("X402_POLL_INTERVAL_SECS", "10")
                    .parse()
                    .context("Invalid X402_POLL_INTERVAL_SECS")?,
            ),
            max_wait: Duration::from_secs(
                var_or("X402_MAX_WAIT_SECS", "600")
                    .parse()
                    .context("Invalid X402_MAX_WAIT_SECS")?,
            ),

            data_dir: Self::resolve_data_dir(&lookup)?,
            ledger_capacity: var_or("X402_LEDGER_CAPACITY", &DEFAULT_LEDGER_CAPACITY.to_string())
                .parse()
                .context("Invalid X402_LEDGER_CAPACITY")?,
            private_key_override: lookup("X402_PRIVATE_KEY"),
        };

        config.validate()?;
        Ok(config)
    }

    fn resolve_data_dir<F>(lookup: &F) -> Result<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("X402_HOME") {
            return Ok(PathBuf::from(dir));
        }
        let home = lookup("HOME")
            .or_else(|| lookup("USERPROFILE"))
            .context("Cannot locate home directory; set X402_HOME")?;
        Ok(PathBuf::from(home).join(".x402-agent"))
    }

    /// RPC endpoint for the configured payment network.
    pub fn payment_rpc_url(&self) -> &str {
        match self.network {
            PaymentNetwork::Base => &self.base_rpc_url,
            PaymentNetwork::BaseSepolia => &self.base_sepolia_rpc_url,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("payments.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("X402_API_URL", Some(self.api_url.as_str())),
            ("BASE_RPC_URL", Some(self.base_rpc_url.as_str())),
            ("BASE_SEPOLIA_RPC_URL", Some(self.base_sepolia_rpc_url.as_str())),
            ("ETH_RPC_URL", self.eth_rpc_url.as_deref()),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http") {
                    bail!("{} must be HTTP(S) URL", name);
                }
            }
        }

        if self.max_payment_usd <= Decimal::ZERO {
            bail!("X402_MAX_PAYMENT_USD must be positive");
        }
        if self.ledger_capacity == 0 {
            bail!("X402_LEDGER_CAPACITY must be at least 1");
        }
        if self.poll_interval.is_zero() {
            bail!("X402_POLL_INTERVAL_SECS must be at least 1");
        }

        tracing::info!(
            "Configuration validated for {} (payment cap ${})",
            self.network,
            self.max_payment_usd
        );

        Ok(())
    }
}
