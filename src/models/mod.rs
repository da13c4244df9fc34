pub mod funding;
pub mod ledger;
pub mod payment;

pub use funding::*;
pub use ledger::*;
pub use payment::*;
