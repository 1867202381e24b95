//! Pool coordinator
//!
//! Composition point for the registry, the difficulty controller, the payment
//! processor and the share ledger. The transport layer talks to the pool only
//! through this type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use crate::batch::BatchReport;
use crate::bridge::StateBridge;
use crate::config::PoolConfig;
use crate::difficulty::{
    DifficultyController, DifficultyStats, CREDIT_PER_PARTIAL, TRAILING_WINDOW,
};
use crate::error::{Error, Result};
use crate::farmer::{Farmer, LauncherId, Partial, Payout, PoolRewardEvent};
use crate::ledger::ShareLedger;
use crate::payment::{PaymentProcessor, PaymentStrategy};
use crate::registry::FarmerRegistry;
use crate::time::unix_timestamp;
use crate::validation::{check_partial_shape, WorkValidator};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    pub timestamp: u64,
    pub total_farmers: usize,
    pub active_farmers: usize,
    pub total_credits: u64,
    pub total_paid: u64,
    pub payout_count: usize,
    pub ledger_entries: usize,
    pub strategy: PaymentStrategy,
    pub fee_percent: f64,
    pub min_payout: u64,
    pub difficulty: DifficultyStats,
}

pub struct PoolCoordinator {
    config: PoolConfig,
    registry: Arc<FarmerRegistry>,
    ledger: Arc<ShareLedger>,
    difficulty: DifficultyController,
    payments: PaymentProcessor,
    validator: Arc<dyn WorkValidator + Send + Sync>,
}

impl PoolCoordinator {
    pub fn new(
        config: PoolConfig,
        bridge: Arc<dyn StateBridge + Send + Sync>,
        validator: Arc<dyn WorkValidator + Send + Sync>,
    ) -> eyre::Result<Self> {
        config.validate()?;

        let registry = Arc::new(FarmerRegistry::new(bridge.clone()));
        let ledger = Arc::new(ShareLedger::new(TRAILING_WINDOW));
        let difficulty =
            DifficultyController::new(&config.difficulty, registry.clone(), ledger.clone());
        let payments =
            PaymentProcessor::new(&config.payments, registry.clone(), bridge, ledger.clone());

        log::info!(
            "pool ready: {:?} payouts, fee {:.2}%, min payout {}, difficulty [{}, {}]",
            config.payments.strategy,
            config.payments.fee_percent,
            config.payments.min_payout,
            config.difficulty.min,
            config.difficulty.max,
        );
        Ok(Self {
            config,
            registry,
            ledger,
            difficulty,
            payments,
            validator,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn registry(&self) -> &FarmerRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &ShareLedger {
        &self.ledger
    }

    pub fn difficulty(&self) -> &DifficultyController {
        &self.difficulty
    }

    pub fn payments(&self) -> &PaymentProcessor {
        &self.payments
    }

    /// Register a farmer at the initial difficulty.
    pub fn register_farmer(&self, launcher_id: LauncherId, pool_url: &str) -> Result<Farmer> {
        let farmer = Farmer::new(launcher_id, pool_url, self.config.difficulty.initial);
        self.registry.add(farmer.clone())?;
        Ok(farmer)
    }

    pub fn farmer(&self, launcher_id: &LauncherId) -> Result<Farmer> {
        self.registry.get(launcher_id)
    }

    /// All farmers, ordered by launcher id.
    pub fn farmers(&self) -> Vec<Farmer> {
        let mut farmers = self.registry.all();
        farmers.sort_unstable_by_key(|f| f.launcher_id);
        farmers
    }

    pub fn remove_farmer(&self, launcher_id: &LauncherId) -> Result<Farmer> {
        self.registry.remove(launcher_id)
    }

    pub fn set_active(&self, launcher_id: &LauncherId, active: bool) -> Result<Farmer> {
        self.registry.set_active(launcher_id, active)
    }

    /// Validate a partial and credit its farmer.
    ///
    /// Every accepted partial is worth `CREDIT_PER_PARTIAL`, the same unit the
    /// difficulty controller measures submission rates in. Nothing is credited
    /// unless the validator accepted the partial. The farmer's state is checked
    /// again once validation is done, since a retarget may have landed while
    /// the solver was busy.
    pub fn submit_partial(&self, partial: &Partial) -> Result<Farmer> {
        let launcher_id = partial.launcher_id;
        let reject = |reason: String| Error::ValidationFailure {
            launcher_id,
            reason,
        };

        check_partial_shape(partial).map_err(reject)?;
        let farmer = self.registry.get(&launcher_id)?;
        if !farmer.is_active {
            return Err(reject("farmer is not active".to_string()));
        }
        if partial.difficulty < farmer.difficulty {
            return Err(reject(format!(
                "difficulty {} below assigned {}",
                partial.difficulty, farmer.difficulty
            )));
        }

        match self.validator.validate(partial) {
            Ok(true) => {}
            Ok(false) => return Err(reject("proof rejected by solver".to_string())),
            Err(e) => {
                log::warn!("could not validate partial from {launcher_id}: {e}");
                return Err(reject(e.to_string()));
            }
        }

        let farmer = self.registry.record_partial(
            &launcher_id,
            partial.difficulty,
            CREDIT_PER_PARTIAL,
            |_| self.ledger.record(launcher_id, CREDIT_PER_PARTIAL),
        )?;
        log::debug!(
            "accepted partial from {launcher_id}: +{CREDIT_PER_PARTIAL} (total {})",
            farmer.points
        );
        Ok(farmer)
    }

    /// Retarget all farmers if the adjustment interval has passed.
    pub fn retarget(&self) -> Option<BatchReport<u64>> {
        self.difficulty.auto_adjust_all(&self.farmers())
    }

    /// Split `reward` over the current pool credit.
    pub fn distribute_reward(&self, reward: u64) -> BatchReport<u64> {
        self.distribute(PoolRewardEvent {
            reward,
            total_credit: self.registry.total_credits(),
        })
    }

    /// Credit every farmer's share of the reward to its balance. Only the
    /// credit the share was computed from is used up: a farmer that received
    /// nothing keeps all of it, and partials recorded while the round runs
    /// count towards the next one.
    pub fn distribute(&self, event: PoolRewardEvent) -> BatchReport<u64> {
        let farmers = self.farmers();
        let amounts =
            self.payments
                .calculate_total_payouts(&farmers, event.total_credit, event.reward);
        let mut ordered: Vec<_> = farmers
            .iter()
            .filter_map(|f| amounts.get(&f.launcher_id).map(|a| (f.launcher_id, *a, f.points)))
            .collect();
        ordered.sort_unstable_by_key(|(id, _, _)| *id);

        let report = BatchReport::run(
            ordered
                .into_iter()
                .map(|(id, amount, credit)| (id, (id, amount, credit))),
            |(id, amount, credit)| {
                self.registry
                    .accrue_reward(&id, amount, credit)
                    .map(|_| amount)
            },
        );

        let pruned = self
            .ledger
            .prune(self.config.payments.pplns_window, SystemTime::now());
        let distributed: u64 = report.completed.iter().map(|(_, amount)| amount).sum();
        log::info!(
            "distributed {distributed} of {} to {} farmers ({pruned} ledger entries pruned)",
            event.reward,
            report.completed.len()
        );
        if let Some((id, e)) = &report.failed {
            log::error!("reward distribution aborted at farmer {id}: {e}");
        }
        report
    }

    pub fn request_payout(&self, launcher_id: &LauncherId, amount: u64) -> Result<Payout> {
        let farmer = self.registry.get(launcher_id)?;
        self.payments.request_payout(&farmer, amount)
    }

    pub fn payout_history(&self, launcher_id: &LauncherId) -> Result<Vec<Payout>> {
        self.payments.get_payout_history(launcher_id)
    }

    /// Settle the whole balance of every farmer owed at least the minimum payout.
    pub fn process_all_payouts(&self) -> BatchReport<Payout> {
        let min_payout = self.payments.min_payout();
        let amounts: HashMap<_, _> = self
            .registry
            .all()
            .into_iter()
            .filter(|f| f.balance > 0 && f.balance >= min_payout)
            .map(|f| (f.launcher_id, f.balance))
            .collect();
        if amounts.is_empty() {
            log::debug!("no balances to settle");
            return BatchReport::default();
        }

        let report = self.payments.process_batch_payouts(&amounts);
        log::info!(
            "settled {} of {} pending balances",
            report.completed.len(),
            amounts.len()
        );
        report
    }

    pub fn system_stats(&self) -> SystemStats {
        let farmers = self.registry.all();
        SystemStats {
            timestamp: unix_timestamp(SystemTime::now()),
            total_farmers: farmers.len(),
            active_farmers: self.registry.active_count(self.config.active_window),
            total_credits: self.registry.total_credits(),
            total_paid: self.payments.total_paid(),
            payout_count: self.payments.payout_count(),
            ledger_entries: self.ledger.len(),
            strategy: self.payments.strategy(),
            fee_percent: self.payments.fee_percent(),
            min_payout: self.payments.min_payout(),
            difficulty: self.difficulty.difficulty_stats(&farmers),
        }
    }
}
