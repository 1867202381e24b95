//! Contributor state and the values that flow between pool components.

use std::{fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, TimestampSeconds};

pub const LAUNCHER_ID_LEN: usize = 32;
pub const CHALLENGE_LEN: usize = 32;
/// BLS G2 signature.
pub const SIGNATURE_LEN: usize = 96;
pub const MIN_PLOT_SIZE: u8 = 25;
pub const MAX_PLOT_SIZE: u8 = 50;

/// Unique identifier of a farmer (the launcher id of its plot NFT).
/// Rendered as a 64 character hex string.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LauncherId(#[serde_as(as = "Hex")] [u8; LAUNCHER_ID_LEN]);

impl LauncherId {
    pub const fn new(bytes: [u8; LAUNCHER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LAUNCHER_ID_LEN] {
        &self.0
    }
}

impl From<[u8; LAUNCHER_ID_LEN]> for LauncherId {
    fn from(bytes: [u8; LAUNCHER_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for LauncherId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; LAUNCHER_ID_LEN];
        hex::decode_to_slice(s, &mut id)?;
        Ok(Self(id))
    }
}

impl fmt::Display for LauncherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for LauncherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LauncherId({self})")
    }
}

/// A farmer registered with the pool.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farmer {
    pub launcher_id: LauncherId,
    pub pool_url: String,
    /// Difficulty assigned to this farmer's partials.
    pub difficulty: u64,
    /// Credit accumulated since the last reward distribution that paid this farmer.
    pub points: u64,
    /// Lifetime number of accepted partials.
    pub partials: u64,
    /// Unsettled balance in the smallest reward unit.
    pub balance: u64,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub last_activity: SystemTime,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    pub last_payout: Option<SystemTime>,
    pub is_active: bool,
}

impl Farmer {
    pub fn new(launcher_id: LauncherId, pool_url: impl Into<String>, difficulty: u64) -> Self {
        Self {
            launcher_id,
            pool_url: pool_url.into(),
            difficulty,
            points: 0,
            partials: 0,
            balance: 0,
            last_activity: SystemTime::now(),
            last_payout: None,
            is_active: true,
        }
    }
}

/// A farmer's claim that it found a proof of space for a challenge
/// at the stated difficulty.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partial {
    #[serde_as(as = "Hex")]
    pub challenge: [u8; CHALLENGE_LEN],
    pub launcher_id: LauncherId,
    #[serde_as(as = "Hex")]
    pub signature: Vec<u8>,
    /// Client side unix timestamp.
    pub timestamp: u64,
    pub difficulty: u64,
    /// The k-size of the plot the proof came from.
    pub plot_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processed,
    Failed,
}

/// A settled (or attempted) transfer to a farmer.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub launcher_id: LauncherId,
    pub amount: u64,
    #[serde_as(as = "TimestampSeconds<i64>")]
    pub timestamp: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    pub status: PayoutStatus,
}

impl Payout {
    pub(crate) fn pending(launcher_id: LauncherId, amount: u64) -> Self {
        Self {
            launcher_id,
            amount,
            timestamp: SystemTime::now(),
            tx_id: None,
            status: PayoutStatus::Pending,
        }
    }

    pub(crate) fn processed(self, tx_id: Option<String>) -> Self {
        Self {
            tx_id,
            status: PayoutStatus::Processed,
            ..self
        }
    }

    pub(crate) fn failed(self) -> Self {
        Self {
            status: PayoutStatus::Failed,
            ..self
        }
    }
}

/// A reward to split between farmers, together with the total pool credit
/// at the time of distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRewardEvent {
    pub reward: u64,
    pub total_credit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_HEX: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";

    #[test]
    fn launcher_id_from_hex() {
        let id: LauncherId = ID_HEX.parse().unwrap();
        assert_eq!(ID_HEX, id.to_string());
        assert_eq!(0xa1, id.as_bytes()[0]);
    }

    #[test]
    fn launcher_id_rejects_wrong_length() {
        assert!("a1b2".parse::<LauncherId>().is_err());
        assert!(format!("{ID_HEX}00").parse::<LauncherId>().is_err());
        assert!(ID_HEX.replace('a', "z").parse::<LauncherId>().is_err());
    }

    #[test]
    fn launcher_id_serializes_as_hex_string() {
        let id: LauncherId = ID_HEX.parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(format!("\"{ID_HEX}\""), json);
        assert_eq!(id, serde_json::from_str(&json).unwrap());
    }

    #[test]
    fn payout_status_transitions_keep_amount() {
        let id = LauncherId::new([3; 32]);
        let payout = Payout::pending(id, 77);
        assert_eq!(PayoutStatus::Pending, payout.status);

        let processed = payout.clone().processed(Some("tx".into()));
        assert_eq!(PayoutStatus::Processed, processed.status);
        assert_eq!(77, processed.amount);
        assert_eq!(Some("tx".to_string()), processed.tx_id);

        let failed = payout.failed();
        assert_eq!(PayoutStatus::Failed, failed.status);
        assert!(failed.tx_id.is_none());
    }

    #[test]
    fn new_farmer_defaults() {
        let farmer = Farmer::new(LauncherId::new([1; 32]), "https://pool.example.com", 10);
        assert_eq!(10, farmer.difficulty);
        assert_eq!(0, farmer.points);
        assert_eq!(0, farmer.balance);
        assert!(farmer.is_active);
        assert!(farmer.last_payout.is_none());
    }
}
