use crate::error::{Result, X402Error};
use async_trait::async_trait;
use ethers::{
    prelude::*,
    providers::{Http, Provider},
    types::{Address, U256},
};
use std::sync::Arc;

abigen!(
    IERC20,
    r#"[
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

/// Something that can report one address's balance on one chain.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Chain or network name used as the key in funding results.
    fn chain(&self) -> &str;

    /// Decimal places of the asset this source reports.
    fn decimals(&self) -> u32;

    async fn balance_of(&self, address: Address) -> Result<U256>;
}

fn provider(chain: &str, rpc_url: &str) -> Result<Provider<Http>> {
    Provider::<Http>::try_from(rpc_url)
        .map_err(|e| X402Error::ConfigError(format!("Invalid RPC URL for {}: {}", chain, e)))
}

/// Native asset (ETH) balance via `eth_getBalance`, with an optional fallback RPC.
pub struct NativeBalanceSource {
    chain: String,
    primary: Provider<Http>,
    fallback: Option<Provider<Http>>,
}

impl NativeBalanceSource {
    pub fn new(chain: impl Into<String>, rpc_url: &str, fallback_url: Option<&str>) -> Result<Self> {
        let chain = chain.into();
        let primary = provider(&chain, rpc_url)?;
        let fallback = fallback_url.map(|url| provider(&chain, url)).transpose()?;

        Ok(Self {
            chain,
            primary,
            fallback,
        })
    }

    fn failure(&self, e: impl std::fmt::Display) -> X402Error {
        X402Error::BalanceCheckFailed {
            chain: self.chain.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl BalanceSource for NativeBalanceSource {
    fn chain(&self) -> &str {
        &self.chain
    }

    fn decimals(&self) -> u32 {
        18
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        match self.primary.get_balance(address, None).await {
            Ok(balance) => Ok(balance),
            Err(e) => match &self.fallback {
                Some(fallback) => {
                    tracing::warn!("Primary RPC failed for {}: {}, trying fallback", self.chain, e);
                    fallback
                        .get_balance(address, None)
                        .await
                        .map_err(|e| self.failure(e))
                }
                None => Err(self.failure(e)),
            },
        }
    }
}

/// ERC-20 token balance via `balanceOf`.
pub struct Erc20BalanceSource {
    chain: String,
    token: IERC20<Provider<Http>>,
    decimals: u32,
}

impl Erc20BalanceSource {
    pub fn new(
        chain: impl Into<String>,
        rpc_url: &str,
        token_address: Address,
        decimals: u32,
    ) -> Result<Self> {
        let chain = chain.into();
        let client = Arc::new(provider(&chain, rpc_url)?);

        Ok(Self {
            token: IERC20::new(token_address, client),
            chain,
            decimals,
        })
    }

    pub fn token_address(&self) -> Address {
        self.token.address()
    }
}

#[async_trait]
impl BalanceSource for Erc20BalanceSource {
    fn chain(&self) -> &str {
        &self.chain
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        self.token
            .balance_of(address)
            .call()
            .await
            .map_err(|e| X402Error::BalanceCheckFailed {
                chain: self.chain.clone(),
                reason: e.to_string(),
            })
    }
}

/// Renders `raw` with `decimals` places, falling back to the raw integer.
pub fn format_balance(raw: U256, decimals: u32) -> String {
    ethers::utils::format_units(raw, decimals).unwrap_or_else(|_| raw.to_string())
}
