use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum X402Error {
    #[error("402 response is missing the X-PAYMENT-REQUIRED header")]
    MissingPaymentHeader,

    #[error("Invalid payment header: {0}")]
    InvalidPaymentHeader(String),

    #[error("Payment of {amount} USD exceeds the per-request limit of {limit} USD")]
    PaymentLimitExceeded { amount: Decimal, limit: Decimal },

    #[error("Server still requires payment after {attempts} signed attempts")]
    PaymentRetriesExhausted { attempts: u32 },

    #[error("Wallet {address} not funded within {}s", waited.as_secs())]
    FundingTimeout { address: String, waited: Duration },

    #[error("Balance check failed on {chain}: {reason}")]
    BalanceCheckFailed { chain: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Nonce generation failed: {0}")]
    Nonce(String),

    #[error("Invalid payment amount: {0}")]
    InvalidAmount(String),

    #[error("Ledger I/O error: {0}")]
    LedgerIo(#[from] std::io::Error),

    #[error("Ledger format error: {0}")]
    LedgerFormat(#[from] serde_json::Error),

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl X402Error {
    /// True for failures caused by the server speaking the payment protocol badly.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            X402Error::MissingPaymentHeader | X402Error::InvalidPaymentHeader(_)
        )
    }
}

pub type Result<T, E = X402Error> = std::result::Result<T, E>;
