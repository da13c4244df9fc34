use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::U256;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use x402_agent::{
    client::{
        ApiRequest, CredentialStore, FileCredentials, LocalSigningWallet, PaymentNegotiator,
        SigningWallet,
    },
    config::Config,
    models::{FundingResult, Settlement, TokenUsage},
    services::{
        FundingMonitor, NativeBalanceSource, NewPayment, PaymentLedger, StablecoinBalance,
        StablecoinMonitor,
    },
};

const DEFAULT_MODEL: &str = "unknown";

#[derive(Parser)]
#[command(name = "x402-agent", version, about = "Pay for API calls with x402 micropayments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the wallet address.
    Address,
    /// Show balances once.
    Balance {
        /// Check USDC on the payment network instead of native ETH.
        #[arg(long)]
        usdc: bool,
        /// Chains to check (native balances only).
        #[arg(long, value_delimiter = ',')]
        chains: Vec<String>,
    },
    /// Block until the wallet is funded.
    WaitFunding {
        #[arg(long)]
        usdc: bool,
        #[arg(long, value_delimiter = ',')]
        chains: Vec<String>,
        /// Minimum native balance in wei.
        #[arg(long, default_value = "1")]
        min_wei: String,
    },
    /// Call the paid API, paying if asked.
    Request {
        path: String,
        /// JSON body; sends POST when present.
        #[arg(long)]
        body: Option<String>,
        /// Model to attribute the payment to.
        #[arg(long, env = "X402_MODEL")]
        model: Option<String>,
    },
    /// List recorded payments, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Spend summary.
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing::info!("x402-agent v{} on {}", env!("CARGO_PKG_VERSION"), config.network);

    let ledger = PaymentLedger::new(config.ledger_path(), config.ledger_capacity);
    let credentials = FileCredentials::new(config.credentials_path());

    match cli.command {
        Command::Address => {
            let wallet = load_wallet(&config, &credentials)?;
            println!("{}", wallet.checksum_address());
        }
        Command::Balance { usdc, chains } => {
            let address = load_wallet(&config, &credentials)?.address();
            if usdc {
                let monitor = StablecoinMonitor::for_network(config.network, config.payment_rpc_url())?
                    .with_timeout(config.balance_timeout);
                print_json(&monitor.check(address).await)?;
            } else {
                let monitor = native_monitor(&config)?;
                let chains = pick_chains(&monitor, &chains);
                let refs: Vec<&str> = chains.iter().map(String::as_str).collect();
                print_json(&monitor.check_balance(address, &refs).await)?;
            }
        }
        Command::WaitFunding { usdc, chains, min_wei } => {
            let address = load_wallet(&config, &credentials)?.address();
            if usdc {
                let monitor = StablecoinMonitor::for_network(config.network, config.payment_rpc_url())?
                    .with_timeout(config.balance_timeout);
                let report = |balance: &StablecoinBalance| {
                    tracing::info!("USDC balance: {}", balance.formatted);
                };
                let funded = monitor
                    .wait_for_funding(address, config.poll_interval, config.max_wait, Some(&report))
                    .await?;
                print_json(&funded)?;
            } else {
                let min_balance = U256::from_dec_str(&min_wei)
                    .with_context(|| format!("Invalid --min-wei: {}", min_wei))?;
                let monitor = native_monitor(&config)?;
                let chains = pick_chains(&monitor, &chains);
                let refs: Vec<&str> = chains.iter().map(String::as_str).collect();
                let report = |result: &FundingResult| {
                    tracing::info!("Total balance: {}", result.total_formatted);
                };
                let funded = monitor
                    .wait_for_funding(
                        address,
                        min_balance,
                        &refs,
                        config.poll_interval,
                        config.max_wait,
                        Some(&report),
                    )
                    .await?;
                print_json(&funded)?;
            }
        }
        Command::Request { path, body, model } => {
            let defaults = credentials.get_credentials()?;
            let wallet = load_wallet(&config, &credentials)?;
            let negotiator = PaymentNegotiator::new(
                config.api_url.clone(),
                config.network.as_str(),
                config.max_payment_usd,
                Arc::new(wallet),
            )?;

            let request = match body {
                Some(body) => {
                    let json = serde_json::from_str(&body).context("--body is not valid JSON")?;
                    ApiRequest::post_json(path, json)
                }
                None => ApiRequest::get(path),
            };

            let negotiated = negotiator.negotiate(&request).await?;
            let status = negotiated.response.status();
            let text = negotiated.response.text().await?;
            let parsed: Option<serde_json::Value> = serde_json::from_str(&text).ok();

            match negotiated.settlement {
                Settlement::Settled(proof) => {
                    let model = model
                        .or_else(|| parsed.as_ref().and_then(response_model))
                        .or(defaults.model)
                        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
                    let usage = parsed.as_ref().map(response_usage).unwrap_or_default();
                    if let Err(e) = ledger.record(NewPayment { proof, model, usage }).await {
                        tracing::warn!("Paid, but could not record the payment: {}", e);
                    }
                }
                Settlement::Unconfirmed { reason } => {
                    tracing::warn!("Paid, but no proof to record: {}", reason);
                }
                Settlement::Free => {}
            }

            if !status.is_success() {
                bail!("Request failed with {}: {}", status, text);
            }
            println!("{}", text);
        }
        Command::History { limit } => {
            print_json(&ledger.history(limit).await?)?;
        }
        Command::Summary => {
            print_json(&ledger.summary().await?)?;
        }
    }

    Ok(())
}

fn load_wallet(config: &Config, credentials: &dyn CredentialStore) -> Result<LocalSigningWallet> {
    let key = match &config.private_key_override {
        Some(key) => key.clone(),
        None => credentials
            .get_credentials()?
            .private_key
            .context("No private key: set X402_PRIVATE_KEY or add privateKey to credentials.json")?,
    };
    Ok(LocalSigningWallet::from_private_key(&key)?)
}

fn native_monitor(config: &Config) -> Result<FundingMonitor> {
    let mut monitor = FundingMonitor::new(config.balance_timeout)
        .with_source(Arc::new(NativeBalanceSource::new("base", &config.base_rpc_url, None)?))?
        .with_source(Arc::new(NativeBalanceSource::new(
            "base-sepolia",
            &config.base_sepolia_rpc_url,
            None,
        )?))?;

    if let Some(url) = &config.eth_rpc_url {
        monitor = monitor.with_source(Arc::new(NativeBalanceSource::new("ethereum", url, None)?))?;
    }

    Ok(monitor)
}

fn pick_chains(monitor: &FundingMonitor, requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        monitor.chains().into_iter().map(str::to_string).collect()
    } else {
        requested.to_vec()
    }
}

fn response_model(body: &serde_json::Value) -> Option<String> {
    body.get("model")?.as_str().map(str::to_string)
}

fn response_usage(body: &serde_json::Value) -> TokenUsage {
    let usage = body.get("usage");
    let count = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| usage.and_then(|u| u.get(*key)).and_then(|v| v.as_u64()))
            .unwrap_or(0)
    };
    TokenUsage {
        input_tokens: count(&["prompt_tokens", "input_tokens"]),
        output_tokens: count(&["completion_tokens", "output_tokens"]),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
