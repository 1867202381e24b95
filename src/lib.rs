mod batch;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod difficulty;
mod error;
pub mod farmer;
pub mod ledger;
pub mod payment;
pub mod registry;
mod time;
pub mod validation;

pub use batch::BatchReport;
pub use coordinator::PoolCoordinator;
pub use error::{Error, Result};
pub use farmer::{Farmer, LauncherId, Partial, Payout, PayoutStatus, PoolRewardEvent};
pub use time::unix_timestamp;
