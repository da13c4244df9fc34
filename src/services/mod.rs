pub mod balance;
pub mod clock;
pub mod funding;
pub mod ledger;
pub mod stablecoin;

pub use balance::{BalanceSource, Erc20BalanceSource, NativeBalanceSource};
pub use clock::{Clock, ManualClock, SystemClock};
pub use funding::FundingMonitor;
pub use ledger::{NewPayment, PaymentLedger};
pub use stablecoin::{StablecoinBalance, StablecoinMonitor};
