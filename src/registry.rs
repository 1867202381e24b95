//! Farmer registry
//!
//! Authoritative in-process store of every farmer. All access goes through a
//! single registry-wide `RwLock`: reads run concurrently, writes are exclusive
//! and hold the lock for their whole duration, including the call into the
//! state bridge. A write is staged on a copy of the record, propagated to the
//! bridge, and committed to memory only if the bridge accepted it, so the
//! in-memory view never runs ahead of the bridge.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::bridge::{BridgeError, StateBridge};
use crate::error::{Error, Result};
use crate::farmer::{Farmer, LauncherId};

pub struct FarmerRegistry {
    farmers: RwLock<HashMap<LauncherId, Farmer>>,
    bridge: Arc<dyn StateBridge + Send + Sync>,
}

impl FarmerRegistry {
    pub fn new(bridge: Arc<dyn StateBridge + Send + Sync>) -> Self {
        Self {
            farmers: RwLock::new(HashMap::new()),
            bridge,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<LauncherId, Farmer>> {
        self.farmers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LauncherId, Farmer>> {
        self.farmers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new farmer. Nothing is inserted if the bridge rejects it.
    pub fn add(&self, farmer: Farmer) -> Result<()> {
        let mut farmers = self.write();
        if farmers.contains_key(&farmer.launcher_id) {
            return Err(Error::AlreadyExists(farmer.launcher_id));
        }
        self.bridge
            .add_farmer(&farmer)
            .map_err(Error::bridge(farmer.launcher_id))?;

        log::info!(
            "registered farmer {} (difficulty {})",
            farmer.launcher_id,
            farmer.difficulty
        );
        farmers.insert(farmer.launcher_id, farmer);
        Ok(())
    }

    pub fn get(&self, launcher_id: &LauncherId) -> Result<Farmer> {
        self.read()
            .get(launcher_id)
            .cloned()
            .ok_or(Error::NotFound(*launcher_id))
    }

    /// Replace the stored record and refresh its last activity.
    pub fn update(&self, mut farmer: Farmer) -> Result<()> {
        let mut farmers = self.write();
        farmer.last_activity = SystemTime::now();
        if !farmers.contains_key(&farmer.launcher_id) {
            return Err(Error::NotFound(farmer.launcher_id));
        }
        self.bridge
            .update_farmer(&farmer)
            .map_err(Error::bridge(farmer.launcher_id))?;
        farmers.insert(farmer.launcher_id, farmer);
        Ok(())
    }

    pub fn remove(&self, launcher_id: &LauncherId) -> Result<Farmer> {
        let mut farmers = self.write();
        if !farmers.contains_key(launcher_id) {
            return Err(Error::NotFound(*launcher_id));
        }
        self.bridge
            .remove_farmer(launcher_id)
            .map_err(Error::bridge(*launcher_id))?;

        log::info!("removed farmer {launcher_id}");
        farmers.remove(launcher_id).ok_or(Error::NotFound(*launcher_id))
    }

    /// Apply `f` to a copy of the farmer, push the copy to the bridge and
    /// commit it. Returns the committed record.
    fn mutate<F>(&self, launcher_id: &LauncherId, f: F) -> Result<Farmer>
    where
        F: FnOnce(&mut Farmer),
    {
        self.try_mutate(
            launcher_id,
            |farmer| {
                f(farmer);
                Ok(())
            },
            |_| {},
        )
    }

    /// Like `mutate`, but `f` may refuse the change. `on_commit` runs with the
    /// committed record before the write lock is released.
    fn try_mutate<F, C>(&self, launcher_id: &LauncherId, f: F, on_commit: C) -> Result<Farmer>
    where
        F: FnOnce(&mut Farmer) -> Result<()>,
        C: FnOnce(&Farmer),
    {
        let mut farmers = self.write();
        let mut staged = farmers
            .get(launcher_id)
            .cloned()
            .ok_or(Error::NotFound(*launcher_id))?;
        f(&mut staged)?;
        self.bridge
            .update_farmer(&staged)
            .map_err(Error::bridge(*launcher_id))?;
        on_commit(&staged);
        farmers.insert(*launcher_id, staged.clone());
        Ok(staged)
    }

    pub fn add_credit(&self, launcher_id: &LauncherId, amount: u64) -> Result<Farmer> {
        self.mutate(launcher_id, |farmer| {
            farmer.points = farmer.points.saturating_add(amount);
            farmer.last_activity = SystemTime::now();
        })
    }

    pub fn set_difficulty(&self, launcher_id: &LauncherId, difficulty: u64) -> Result<Farmer> {
        self.mutate(launcher_id, |farmer| {
            farmer.difficulty = difficulty;
            farmer.last_activity = SystemTime::now();
        })
    }

    pub fn increment_partials(&self, launcher_id: &LauncherId) -> Result<Farmer> {
        self.mutate(launcher_id, |farmer| {
            farmer.partials += 1;
            farmer.last_activity = SystemTime::now();
        })
    }

    /// Credit an accepted partial and count it in a single write.
    ///
    /// The farmer must still be active and the partial must still meet the
    /// farmer's difficulty at the time of the write, otherwise nothing changes.
    /// `on_commit` runs under the registry lock once the write went through.
    pub fn record_partial<C>(
        &self,
        launcher_id: &LauncherId,
        partial_difficulty: u64,
        credit: u64,
        on_commit: C,
    ) -> Result<Farmer>
    where
        C: FnOnce(&Farmer),
    {
        self.try_mutate(
            launcher_id,
            |farmer| {
                let reason = if !farmer.is_active {
                    "farmer is not active".to_string()
                } else if partial_difficulty < farmer.difficulty {
                    format!(
                        "difficulty {partial_difficulty} below assigned {}",
                        farmer.difficulty
                    )
                } else {
                    farmer.points = farmer.points.saturating_add(credit);
                    farmer.partials += 1;
                    farmer.last_activity = SystemTime::now();
                    return Ok(());
                };
                Err(Error::ValidationFailure {
                    launcher_id: *launcher_id,
                    reason,
                })
            },
            on_commit,
        )
    }

    /// Move a distributed reward into the farmer's balance and take the
    /// `paid_credit` it was computed from off the farmer's credit. Credit
    /// earned since the payout was computed is kept.
    pub fn accrue_reward(
        &self,
        launcher_id: &LauncherId,
        amount: u64,
        paid_credit: u64,
    ) -> Result<Farmer> {
        self.mutate(launcher_id, |farmer| {
            farmer.balance = farmer.balance.saturating_add(amount);
            farmer.points = farmer.points.saturating_sub(paid_credit);
        })
    }

    pub fn set_active(&self, launcher_id: &LauncherId, active: bool) -> Result<Farmer> {
        self.mutate(launcher_id, |farmer| farmer.is_active = active)
    }

    /// Debit `amount` from the farmer's balance once `settle` succeeds.
    ///
    /// `settle` runs under the registry write lock with the staged record; it is
    /// expected to execute the transfer on the bridge, which also records the
    /// debit on its side. Nothing is committed if it fails.
    pub fn settle_balance<F, R>(
        &self,
        launcher_id: &LauncherId,
        amount: u64,
        settle: F,
    ) -> Result<(Farmer, R)>
    where
        F: FnOnce(&Farmer) -> Result<R, BridgeError>,
    {
        let mut farmers = self.write();
        let mut staged = farmers
            .get(launcher_id)
            .cloned()
            .ok_or(Error::NotFound(*launcher_id))?;
        staged.balance =
            staged
                .balance
                .checked_sub(amount)
                .ok_or(Error::InsufficientBalance {
                    requested: amount,
                    balance: staged.balance,
                })?;
        staged.last_payout = Some(SystemTime::now());

        let settled = settle(&staged).map_err(Error::bridge(*launcher_id))?;
        farmers.insert(*launcher_id, staged.clone());
        Ok((staged, settled))
    }

    /// Point-in-time copy of every farmer, in no particular order.
    pub fn all(&self) -> Vec<Farmer> {
        self.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn total_credits(&self) -> u64 {
        self.read()
            .values()
            .fold(0u64, |acc, f| acc.saturating_add(f.points))
    }

    /// Number of farmers active within the trailing `window`.
    pub fn active_count(&self, window: Duration) -> usize {
        let threshold = SystemTime::now()
            .checked_sub(window)
            .unwrap_or(UNIX_EPOCH);
        self.read()
            .values()
            .filter(|f| f.last_activity > threshold)
            .count()
    }
}
