//! Pay-per-request API access over x402.
//!
//! [`client::PaymentNegotiator`] answers HTTP 402 challenges with signed, time-boxed payment
//! authorizations. [`services::FundingMonitor`] and [`services::StablecoinMonitor`] wait for a
//! wallet to be funded, and [`services::PaymentLedger`] keeps an audit trail of what was paid.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use error::{Result, X402Error};
