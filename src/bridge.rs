//! The state bridge is the authoritative store behind the pool.
//!
//! The registry keeps an in-memory copy of every farmer for fast reads, but
//! every write is staged against the bridge first and only committed locally
//! once the bridge accepted it. Settlements go through the same bridge.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::farmer::{Farmer, LauncherId, Payout};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[mockall::automock]
pub trait StateBridge {
    fn add_farmer(&self, farmer: &Farmer) -> Result<(), BridgeError>;
    fn update_farmer(&self, farmer: &Farmer) -> Result<(), BridgeError>;
    fn remove_farmer(&self, launcher_id: &LauncherId) -> Result<(), BridgeError>;
    /// Executes the transfer and debits the farmer's balance on the bridge side.
    /// Returns the transaction reference if the settlement layer produced one.
    fn settle(&self, payout: &Payout) -> Result<Option<String>, BridgeError>;
}

#[derive(Debug, Default)]
struct Mirror {
    farmers: HashMap<LauncherId, Farmer>,
    settlements: Vec<Payout>,
}

/// In-process bridge that mirrors farmer state and journals settlements.
#[derive(Debug, Default)]
pub struct MemoryBridge {
    state: Mutex<Mirror>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Mirror> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn farmer(&self, launcher_id: &LauncherId) -> Option<Farmer> {
        self.state().farmers.get(launcher_id).cloned()
    }

    pub fn settlements(&self) -> Vec<Payout> {
        self.state().settlements.clone()
    }
}

impl StateBridge for MemoryBridge {
    fn add_farmer(&self, farmer: &Farmer) -> Result<(), BridgeError> {
        let mut state = self.state();
        if state.farmers.contains_key(&farmer.launcher_id) {
            return Err(BridgeError::Rejected(format!(
                "duplicate farmer {}",
                farmer.launcher_id
            )));
        }
        state.farmers.insert(farmer.launcher_id, farmer.clone());
        Ok(())
    }

    fn update_farmer(&self, farmer: &Farmer) -> Result<(), BridgeError> {
        match self.state().farmers.get_mut(&farmer.launcher_id) {
            Some(stored) => {
                *stored = farmer.clone();
                Ok(())
            }
            None => Err(BridgeError::Rejected(format!(
                "unknown farmer {}",
                farmer.launcher_id
            ))),
        }
    }

    fn remove_farmer(&self, launcher_id: &LauncherId) -> Result<(), BridgeError> {
        self.state()
            .farmers
            .remove(launcher_id)
            .map(|_| ())
            .ok_or_else(|| BridgeError::Rejected(format!("unknown farmer {launcher_id}")))
    }

    fn settle(&self, payout: &Payout) -> Result<Option<String>, BridgeError> {
        let mut state = self.state();
        let farmer = state
            .farmers
            .get_mut(&payout.launcher_id)
            .ok_or_else(|| {
                BridgeError::Rejected(format!("unknown farmer {}", payout.launcher_id))
            })?;
        farmer.balance = farmer.balance.checked_sub(payout.amount).ok_or_else(|| {
            BridgeError::Rejected(format!(
                "balance {} too low for {}",
                farmer.balance, payout.amount
            ))
        })?;
        farmer.last_payout = Some(payout.timestamp);

        let tx_id = format!("mem-{:08x}", state.settlements.len());
        state.settlements.push(payout.clone());
        Ok(Some(tx_id))
    }
}
