pub mod credentials;
pub mod negotiator;
pub mod nonce;
pub mod wallet;

pub use credentials::{CredentialStore, Credentials, FileCredentials};
pub use negotiator::{ApiRequest, NegotiatedResponse, PaymentNegotiator, MAX_PAYMENT_ATTEMPTS};
pub use nonce::{FreshNonces, NonceSource, OsNonceSource};
pub use wallet::{LocalSigningWallet, SigningWallet};
