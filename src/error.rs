use thiserror::Error;

use crate::{bridge::BridgeError, farmer::LauncherId};

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("farmer already exists: {0}")]
    AlreadyExists(LauncherId),
    #[error("farmer not found: {0}")]
    NotFound(LauncherId),
    #[error("no payout history for farmer: {0}")]
    NoPayoutHistory(LauncherId),
    #[error("amount below minimum payout: {amount} < {min_payout}")]
    BelowMinimum { amount: u64, min_payout: u64 },
    #[error("insufficient balance: {requested} > {balance}")]
    InsufficientBalance { requested: u64, balance: u64 },
    #[error("state bridge failed for farmer {launcher_id}")]
    Bridge {
        launcher_id: LauncherId,
        #[source]
        source: BridgeError,
    },
    #[error("invalid partial from {launcher_id}: {reason}")]
    ValidationFailure {
        launcher_id: LauncherId,
        reason: String,
    },
}

impl Error {
    pub(crate) fn bridge(launcher_id: LauncherId) -> impl FnOnce(BridgeError) -> Self {
        move |source| Error::Bridge {
            launcher_id,
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
