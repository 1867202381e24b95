//! Payments
//!
//! Turns farmer credit into payouts. A reward is split in proportion to credit
//! (all of a farmer's credit for PPS, only credit inside the last N
//! credit-units for PPLNS), the pool fee is taken off, and amounts below the
//! minimum payout are left to accumulate.
//!
//! All amount arithmetic is done on integers, with `u128` intermediates. The
//! fee is kept in basis points.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::batch::BatchReport;
use crate::bridge::StateBridge;
use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use crate::farmer::{Farmer, LauncherId, Payout, PayoutStatus};
use crate::ledger::ShareLedger;
use crate::registry::FarmerRegistry;

const BPS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStrategy {
    /// Pay per share: all credit since the farmer was last paid counts.
    Pps,
    /// Pay per last N shares: only credit within the most recent N credit-units counts.
    Pplns,
}

pub struct PaymentProcessor {
    registry: Arc<FarmerRegistry>,
    bridge: Arc<dyn StateBridge + Send + Sync>,
    ledger: Arc<ShareLedger>,
    strategy: PaymentStrategy,
    fee_bps: u64,
    min_payout: u64,
    pplns_window: u64,
    history: Mutex<HashMap<LauncherId, Vec<Payout>>>,
}

impl PaymentProcessor {
    pub fn new(
        cfg: &PaymentConfig,
        registry: Arc<FarmerRegistry>,
        bridge: Arc<dyn StateBridge + Send + Sync>,
        ledger: Arc<ShareLedger>,
    ) -> Self {
        let fee_bps = ((cfg.fee_percent * 100.0).round() as u64).min(BPS);
        Self {
            registry,
            bridge,
            ledger,
            strategy: cfg.strategy,
            fee_bps,
            min_payout: cfg.min_payout,
            pplns_window: cfg.pplns_window,
            history: Mutex::new(HashMap::new()),
        }
    }

    fn history(&self) -> MutexGuard<'_, HashMap<LauncherId, Vec<Payout>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn strategy(&self) -> PaymentStrategy {
        self.strategy
    }

    pub fn fee_percent(&self) -> f64 {
        self.fee_bps as f64 / 100.0
    }

    pub fn min_payout(&self) -> u64 {
        self.min_payout
    }

    /// `reward * credit / total` less the fee, or 0 below the minimum payout.
    fn net_amount(&self, credit: u64, total: u64, reward: u64) -> u64 {
        if total == 0 {
            return 0;
        }
        let raw = reward as u128 * credit.min(total) as u128 / total as u128;
        let net = (raw * (BPS - self.fee_bps) as u128 / BPS as u128) as u64;
        if net < self.min_payout {
            0
        } else {
            net
        }
    }

    /// Payout owed to a single farmer out of `reward`.
    ///
    /// Under PPLNS the total is the credit inside the window and `total_credit`
    /// is not used.
    pub fn calculate_payout(&self, farmer: &Farmer, total_credit: u64, reward: u64) -> u64 {
        match self.strategy {
            PaymentStrategy::Pps => self.net_amount(farmer.points, total_credit, reward),
            PaymentStrategy::Pplns => {
                let window = self.ledger.window(self.pplns_window);
                let total = window.values().sum();
                let credit = window.get(&farmer.launcher_id).copied().unwrap_or(0);
                self.net_amount(credit, total, reward)
            }
        }
    }

    /// Payouts for every farmer out of `reward`, leaving out zero amounts.
    ///
    /// The shares never add up to more than one: for PPS the total is raised
    /// to the farmers' summed credit if `total_credit` is lower. PPLNS splits
    /// the ledger window and ignores `total_credit`, so shares still in the
    /// window are paid again when the next reward arrives.
    pub fn calculate_total_payouts(
        &self,
        farmers: &[Farmer],
        total_credit: u64,
        reward: u64,
    ) -> HashMap<LauncherId, u64> {
        let (credits, total) = match self.strategy {
            PaymentStrategy::Pps if total_credit == 0 => return HashMap::new(),
            PaymentStrategy::Pps => {
                let summed = farmers
                    .iter()
                    .fold(0u64, |acc, f| acc.saturating_add(f.points));
                let credits: HashMap<_, _> =
                    farmers.iter().map(|f| (f.launcher_id, f.points)).collect();
                (credits, total_credit.max(summed))
            }
            PaymentStrategy::Pplns => {
                let window = self.ledger.window(self.pplns_window);
                let total = window.values().sum();
                (window, total)
            }
        };

        farmers
            .par_iter()
            .filter_map(|f| {
                let credit = credits.get(&f.launcher_id).copied().unwrap_or(0);
                match self.net_amount(credit, total, reward) {
                    0 => None,
                    amount => Some((f.launcher_id, amount)),
                }
            })
            .collect()
    }

    /// Settle `amount` from the farmer's balance.
    ///
    /// The balance is debited only if the bridge settled the transfer. Either
    /// way the attempt is appended to the farmer's payout history.
    pub fn process_payout(&self, farmer: &Farmer, amount: u64) -> Result<Payout> {
        if amount == 0 || amount < self.min_payout {
            return Err(Error::BelowMinimum {
                amount,
                min_payout: self.min_payout,
            });
        }

        // held across settlement so history order is settlement order
        let mut history = self.history();
        let payout = Payout::pending(farmer.launcher_id, amount);
        let result = self
            .registry
            .settle_balance(&farmer.launcher_id, amount, |_| self.bridge.settle(&payout));

        let record = match result {
            Ok((_, tx_id)) => {
                log::info!(
                    "paid {amount} to {} (tx {})",
                    farmer.launcher_id,
                    tx_id.as_deref().unwrap_or("-")
                );
                payout.processed(tx_id)
            }
            Err(e @ Error::Bridge { .. }) => {
                log::error!("payout of {amount} to {} failed: {e}", farmer.launcher_id);
                history
                    .entry(farmer.launcher_id)
                    .or_default()
                    .push(payout.failed());
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        history
            .entry(farmer.launcher_id)
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    /// Pay out `amount` of the farmer's balance, or the whole balance if `amount` is 0.
    pub fn request_payout(&self, farmer: &Farmer, amount: u64) -> Result<Payout> {
        let amount = match amount {
            0 => farmer.balance,
            amount => amount,
        };
        if amount > farmer.balance {
            return Err(Error::InsufficientBalance {
                requested: amount,
                balance: farmer.balance,
            });
        }
        self.process_payout(farmer, amount)
    }

    /// Settle each amount against the farmer's current state, in launcher id order.
    pub fn process_batch_payouts(&self, amounts: &HashMap<LauncherId, u64>) -> BatchReport<Payout> {
        let mut ordered: Vec<_> = amounts.iter().map(|(id, amount)| (*id, *amount)).collect();
        ordered.sort_unstable_by_key(|(id, _)| *id);

        BatchReport::run(
            ordered.into_iter().map(|(id, amount)| (id, (id, amount))),
            |(id, amount)| {
                let farmer = self.registry.get(&id)?;
                self.process_payout(&farmer, amount)
            },
        )
    }

    pub fn get_payout_history(&self, launcher_id: &LauncherId) -> Result<Vec<Payout>> {
        self.history()
            .get(launcher_id)
            .cloned()
            .ok_or(Error::NoPayoutHistory(*launcher_id))
    }

    /// Sum of all processed payouts.
    pub fn total_paid(&self) -> u64 {
        self.history()
            .values()
            .flatten()
            .filter(|p| p.status == PayoutStatus::Processed)
            .fold(0u64, |acc, p| acc.saturating_add(p.amount))
    }

    pub fn payout_count(&self) -> usize {
        self.history().values().map(Vec::len).sum()
    }
}
