use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_err;
use x402_agent::{
    models::{BalanceReading, FundingResult},
    services::{BalanceSource, FundingMonitor, ManualClock, StablecoinBalance, StablecoinMonitor},
    Result, X402Error,
};

enum Behaviour {
    /// Returns the balances in order, repeating the last one.
    Sequence(Vec<u64>),
    /// Fails the first `failures` reads, then returns `then`.
    Flaky { failures: usize, then: u64 },
    Fail,
    Hang,
}

struct FakeSource {
    chain: &'static str,
    decimals: u32,
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeSource {
    fn new(chain: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            chain,
            decimals: 6,
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BalanceSource for FakeSource {
    fn chain(&self) -> &str {
        self.chain
    }

    fn decimals(&self) -> u32 {
        self.decimals
    }

    async fn balance_of(&self, _address: Address) -> Result<U256> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Sequence(values) => {
                let value = values.get(call).or(values.last()).copied().unwrap_or(0);
                Ok(U256::from(value))
            }
            Behaviour::Flaky { failures, then } if call >= *failures => Ok(U256::from(*then)),
            Behaviour::Flaky { .. } | Behaviour::Fail => Err(X402Error::BalanceCheckFailed {
                chain: self.chain.to_string(),
                reason: "rpc unavailable".to_string(),
            }),
            Behaviour::Hang => futures::future::pending().await,
        }
    }
}

fn wallet() -> Address {
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap()
}

#[tokio::test]
async fn check_balance_isolates_failing_chains() {
    let healthy = FakeSource::new("base", Behaviour::Sequence(vec![2_500_000]));
    let also_healthy = FakeSource::new("optimism", Behaviour::Sequence(vec![500_000]));
    let broken = FakeSource::new("arbitrum", Behaviour::Fail);
    let slow = FakeSource::new("polygon", Behaviour::Hang);

    let monitor = FundingMonitor::new(Duration::from_millis(50))
        .with_source(healthy)
        .unwrap()
        .with_source(also_healthy)
        .unwrap()
        .with_source(broken)
        .unwrap()
        .with_source(slow)
        .unwrap();

    let result = monitor
        .check_balance(wallet(), &["base", "optimism", "arbitrum", "polygon", "zksync"])
        .await;

    assert_eq!(result.balances.len(), 5);
    assert_eq!(result.total_raw, U256::from(3_000_000u64));
    assert_eq!(result.total_formatted, "3.000000");
    assert!(result.has_funds);

    let base = &result.balances["base"];
    assert!(base.has_funds && base.error.is_none());
    assert_eq!(base.formatted, "2.500000");

    for failed in ["arbitrum", "polygon", "zksync"] {
        let sample = &result.balances[failed];
        assert!(!sample.has_funds, "{failed}");
        assert!(sample.error.is_some(), "{failed}");
    }
    assert!(result.balances["polygon"].error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn check_balance_without_funds() {
    let empty = FakeSource::new("base", Behaviour::Sequence(vec![0]));
    let monitor = FundingMonitor::new(Duration::from_secs(1)).with_source(empty).unwrap();

    let result = monitor.check_balance(wallet(), &["base"]).await;
    assert!(!result.has_funds);
    assert_eq!(result.total_raw, U256::zero());
}

#[test]
fn mixed_decimals_are_rejected() {
    let usdc = FakeSource::new("base", Behaviour::Sequence(vec![0]));
    let eth = Arc::new(FakeSource {
        chain: "ethereum",
        decimals: 18,
        behaviour: Behaviour::Sequence(vec![0]),
        calls: AtomicUsize::new(0),
    });

    let monitor = FundingMonitor::new(Duration::from_secs(1)).with_source(usdc).unwrap();
    assert!(matches!(monitor.with_source(eth), Err(X402Error::ConfigError(_))));
}

#[tokio::test]
async fn already_funded_wallet_returns_after_one_poll() {
    let source = FakeSource::new("base", Behaviour::Sequence(vec![20_000]));
    let clock = Arc::new(ManualClock::new());
    let monitor = FundingMonitor::new(Duration::from_secs(1))
        .with_clock(clock.clone())
        .with_source(source.clone())
        .unwrap();

    let result = monitor
        .wait_for_funding(
            wallet(),
            U256::from(10_000u64),
            &["base"],
            Duration::from_secs(5),
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap();

    assert!(result.has_funds);
    assert_eq!(source.calls(), 1);
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn waits_until_any_chain_crosses_threshold() {
    let slow_starter = FakeSource::new("base", Behaviour::Sequence(vec![0, 5_000, 12_000]));
    let flaky = FakeSource::new("optimism", Behaviour::Fail);
    let clock = Arc::new(ManualClock::new());
    let monitor = FundingMonitor::new(Duration::from_secs(1))
        .with_clock(clock.clone())
        .with_source(slow_starter.clone())
        .unwrap()
        .with_source(flaky)
        .unwrap();

    let seen = Mutex::new(Vec::new());
    let observer = |result: &FundingResult| {
        seen.lock().unwrap().push(result.total_raw.as_u64());
    };

    let result = monitor
        .wait_for_funding(
            wallet(),
            U256::from(10_000u64),
            &["base", "optimism"],
            Duration::from_secs(5),
            Duration::from_secs(60),
            Some(&observer),
        )
        .await
        .unwrap();

    assert_eq!(result.total_raw, U256::from(12_000u64));
    assert_eq!(*seen.lock().unwrap(), vec![0, 5_000, 12_000]);
    assert_eq!(slow_starter.calls(), 3);
    assert_eq!(clock.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn times_out_when_balance_stays_zero() {
    let source = FakeSource::new("base", Behaviour::Sequence(vec![0]));
    let clock = Arc::new(ManualClock::new());
    let monitor = FundingMonitor::new(Duration::from_secs(1))
        .with_clock(clock.clone())
        .with_source(source.clone())
        .unwrap();

    let outcome = monitor
        .wait_for_funding(
            wallet(),
            U256::one(),
            &["base"],
            Duration::from_secs(5),
            Duration::from_secs(30),
            None,
        )
        .await;

    let err = assert_err!(outcome);
    assert!(matches!(err, X402Error::FundingTimeout { waited, .. } if waited == Duration::from_secs(30)));
    // Polls at 0, 5, 10, 15, 20, 25 and 30 seconds.
    assert_eq!(source.calls(), 7);
    assert_eq!(clock.elapsed(), Duration::from_secs(30));
}

#[tokio::test]
async fn deadline_cuts_off_an_in_flight_poll() {
    let source = FakeSource::new("base", Behaviour::Hang);
    let clock = Arc::new(ManualClock::new());
    let monitor = FundingMonitor::new(Duration::from_secs(3600))
        .with_clock(clock.clone())
        .with_source(source)
        .unwrap();

    let err = monitor
        .wait_for_funding(
            wallet(),
            U256::one(),
            &["base"],
            Duration::from_secs(5),
            Duration::from_secs(20),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, X402Error::FundingTimeout { .. }));
    assert_eq!(clock.elapsed(), Duration::from_secs(20));
}

#[tokio::test]
async fn stablecoin_read_failure_is_unknown_and_counts_as_zero() {
    let monitor = StablecoinMonitor::with_source(FakeSource::new("base", Behaviour::Fail));

    let balance = monitor.check(wallet()).await;

    assert!(matches!(balance.reading, BalanceReading::Unknown { .. }));
    assert_eq!(balance.reading.or_zero(), U256::zero());
    assert_eq!(balance.formatted, "0.000000");
    assert!(!balance.has_minimum);
    assert_eq!(balance.network, "base");
}

#[tokio::test]
async fn stablecoin_minimum_is_one_cent() {
    let just_under = StablecoinMonitor::with_source(FakeSource::new("base", Behaviour::Sequence(vec![9_999])));
    let exactly = StablecoinMonitor::with_source(FakeSource::new("base", Behaviour::Sequence(vec![10_000])));

    let under = just_under.check(wallet()).await;
    assert_eq!(under.reading, BalanceReading::Verified(U256::from(9_999u64)));
    assert!(!under.has_minimum);

    let funded = exactly.check(wallet()).await;
    assert!(funded.has_minimum);
    assert_eq!(funded.formatted, "0.010000");
}

#[tokio::test]
async fn stablecoin_wait_survives_flaky_reads() {
    let source = FakeSource::new("base-sepolia", Behaviour::Flaky { failures: 2, then: 50_000 });
    let clock = Arc::new(ManualClock::new());
    let monitor = StablecoinMonitor::with_source(source.clone()).with_clock(clock.clone());

    let seen = Mutex::new(Vec::new());
    let observer = |balance: &StablecoinBalance| {
        seen.lock().unwrap().push(balance.reading.clone());
    };

    let funded = monitor
        .wait_for_funding(wallet(), Duration::from_secs(10), Duration::from_secs(120), Some(&observer))
        .await
        .unwrap();

    assert!(funded.has_minimum);
    assert_eq!(funded.reading, BalanceReading::Verified(U256::from(50_000u64)));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[..2]
        .iter()
        .all(|r| matches!(r, BalanceReading::Unknown { .. }) && r.or_zero().is_zero()));
    assert_eq!(source.calls(), 3);
    assert_eq!(clock.elapsed(), Duration::from_secs(20));
}

#[tokio::test]
async fn stablecoin_wait_times_out_when_rpc_never_answers() {
    let clock = Arc::new(ManualClock::new());
    let monitor = StablecoinMonitor::with_source(FakeSource::new("base", Behaviour::Fail))
        .with_clock(clock.clone());

    let err = monitor
        .wait_for_funding(wallet(), Duration::from_secs(10), Duration::from_secs(25), None)
        .await
        .unwrap_err();

    assert!(matches!(err, X402Error::FundingTimeout { .. }));
}
