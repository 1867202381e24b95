//! Difficulty retargeting
//!
//! Each farmer gets its own difficulty, tuned so that it sends roughly
//! `target_partials_per_day` partials. The controller compares the credit a
//! farmer earned in the last 24 hours against the target and moves the
//! difficulty by 20% when the farmer is outside the `[1x, 2x]` target band.
//! Inside the band nothing changes.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

use crate::batch::BatchReport;
use crate::config::DifficultyConfig;
use crate::error::Result;
use crate::farmer::Farmer;
use crate::ledger::CreditHistory;
use crate::registry::FarmerRegistry;

/// Credit earned by every accepted partial, whatever its difficulty.
pub const CREDIT_PER_PARTIAL: u64 = 1000;
/// Window over which a farmer's recent credit is measured.
pub const TRAILING_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const INTERVAL_SLACK: u32 = 20;

/// Compute the next difficulty for a farmer.
///
/// The result is always within `[min, max]`.
pub fn calculate_new_difficulty(
    current: u64,
    credit_24h: u64,
    target_partials_per_day: u64,
    min: u64,
    max: u64,
) -> u64 {
    let target_credit = target_partials_per_day.saturating_mul(CREDIT_PER_PARTIAL);

    let proposed = if credit_24h < target_credit {
        scale_tenths(current, 8)
    } else if credit_24h > target_credit.saturating_mul(2) {
        // small difficulties would never move up by 20% alone
        scale_tenths(current, 12).max(current.saturating_add(1))
    } else {
        current
    };
    proposed.max(min).min(max)
}

/// `floor(value * tenths / 10)`, saturating at `u64::MAX`.
fn scale_tenths(value: u64, tenths: u64) -> u64 {
    let scaled = value as u128 * tenths as u128 / 10;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct Params {
    target_partials_per_day: u64,
    min: u64,
    max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifficultyStats {
    pub average_difficulty: u64,
    pub min_difficulty: u64,
    pub max_difficulty: u64,
    pub total_farmers: usize,
    pub target_partials_per_day: u64,
}

pub struct DifficultyController {
    params: RwLock<Params>,
    adjustment_interval: Duration,
    /// Start time of the last completed pool-wide retarget. Held for the whole
    /// batch so that concurrent batches can't both pass the interval check.
    last_adjustment: Mutex<Option<Instant>>,
    registry: Arc<FarmerRegistry>,
    history: Arc<dyn CreditHistory + Send + Sync>,
}

impl DifficultyController {
    pub fn new(
        cfg: &DifficultyConfig,
        registry: Arc<FarmerRegistry>,
        history: Arc<dyn CreditHistory + Send + Sync>,
    ) -> Self {
        Self {
            params: RwLock::new(Params {
                target_partials_per_day: cfg.target_partials_per_day,
                min: cfg.min,
                max: cfg.max,
            }),
            adjustment_interval: cfg.adjustment_interval,
            last_adjustment: Mutex::new(None),
            registry,
            history,
        }
    }

    fn params(&self) -> Params {
        *self.params.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calculate_new_difficulty(&self, current: u64, credit_24h: u64) -> u64 {
        let p = self.params();
        calculate_new_difficulty(current, credit_24h, p.target_partials_per_day, p.min, p.max)
    }

    /// Retarget a single farmer and write the new difficulty back through the
    /// registry. Returns the new difficulty.
    pub fn adjust_difficulty(&self, farmer: &Farmer) -> Result<u64> {
        let since = SystemTime::now()
            .checked_sub(TRAILING_WINDOW)
            .unwrap_or(UNIX_EPOCH);
        let credit_24h = self.history.credit_since(&farmer.launcher_id, since);
        let difficulty = self.calculate_new_difficulty(farmer.difficulty, credit_24h);

        if difficulty != farmer.difficulty {
            log::info!(
                "farmer {}: difficulty {} -> {difficulty} (24h credit {credit_24h})",
                farmer.launcher_id,
                farmer.difficulty,
            );
        }
        self.registry.set_difficulty(&farmer.launcher_id, difficulty)?;
        Ok(difficulty)
    }

    /// Retarget every given farmer, at most once per adjustment interval.
    ///
    /// Returns `None` if the previous batch started less than an interval ago,
    /// give or take `interval / INTERVAL_SLACK` so that a caller ticking at the
    /// interval is not thrown off by jitter. The interval restarts only when
    /// the whole batch succeeded.
    pub fn auto_adjust_all(&self, farmers: &[Farmer]) -> Option<BatchReport<u64>> {
        let mut last = self
            .last_adjustment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(at) = *last {
            let due = self.adjustment_interval - self.adjustment_interval / INTERVAL_SLACK;
            if at.elapsed() < due {
                log::debug!("skipping retarget, last one started {:?} ago", at.elapsed());
                return None;
            }
        }

        let started = Instant::now();
        let report = BatchReport::run(farmers.iter().map(|f| (f.launcher_id, f)), |f| {
            self.adjust_difficulty(f)
        });
        match &report.failed {
            None => {
                log::info!("retargeted {} farmers", report.completed.len());
                *last = Some(started);
            }
            Some((id, e)) => log::error!(
                "retarget aborted at farmer {id} after {} farmers: {e}",
                report.completed.len()
            ),
        }
        Some(report)
    }

    pub fn set_target_rate(&self, target_partials_per_day: u64) {
        self.params
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .target_partials_per_day = target_partials_per_day;
    }

    /// Applies to later retargets only; stored difficulties are left alone.
    pub fn set_difficulty_range(&self, min: u64, max: u64) -> eyre::Result<()> {
        eyre::ensure!(min > 0, "min difficulty must be > 0");
        eyre::ensure!(
            min <= max,
            format!("min difficulty ({min}) cannot exceed max ({max})")
        );
        let mut params = self.params.write().unwrap_or_else(PoisonError::into_inner);
        params.min = min;
        params.max = max;
        Ok(())
    }

    pub fn target_rate(&self) -> u64 {
        self.params().target_partials_per_day
    }

    pub fn difficulty_range(&self) -> (u64, u64) {
        let p = self.params();
        (p.min, p.max)
    }

    pub fn difficulty_stats(&self, farmers: &[Farmer]) -> DifficultyStats {
        let (min_difficulty, max_difficulty) =
            match farmers.iter().map(|f| f.difficulty).minmax() {
                MinMaxResult::NoElements => (0, 0),
                MinMaxResult::OneElement(d) => (d, d),
                MinMaxResult::MinMax(min, max) => (min, max),
            };
        let total: u128 = farmers.iter().map(|f| f.difficulty as u128).sum();
        let average_difficulty = match farmers.len() {
            0 => 0,
            n => (total / n as u128) as u64,
        };

        DifficultyStats {
            average_difficulty,
            min_difficulty,
            max_difficulty,
            total_farmers: farmers.len(),
            target_partials_per_day: self.target_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::bridge::{BridgeError, MemoryBridge, MockStateBridge};
    use crate::error::Error;
    use crate::farmer::LauncherId;
    use crate::ledger::MockCreditHistory;

    fn cfg() -> DifficultyConfig {
        DifficultyConfig {
            initial: 1000,
            min: 100,
            max: 100_000,
            target_partials_per_day: 300,
            adjustment_interval: Duration::from_secs(60 * 60),
        }
    }

    fn history(credit: u64) -> Arc<MockCreditHistory> {
        let mut history = MockCreditHistory::new();
        history.expect_credit_since().returning(move |_, _| credit);
        Arc::new(history)
    }

    fn setup(credit: u64, farmers: u8) -> (Arc<FarmerRegistry>, DifficultyController) {
        let registry = Arc::new(FarmerRegistry::new(Arc::new(MemoryBridge::new())));
        for b in 0..farmers {
            registry
                .add(Farmer::new(LauncherId::new([b; 32]), "url", 1000))
                .unwrap();
        }
        let controller = DifficultyController::new(&cfg(), registry.clone(), history(credit));
        (registry, controller)
    }

    #[rstest]
    // below target: -20%
    #[case(1000, 0, 800)]
    #[case(1000, 299_999, 800)]
    // inside the band
    #[case(1000, 300_000, 1000)]
    #[case(1000, 600_000, 1000)]
    // above 2x target: +20%
    #[case(1000, 600_001, 1200)]
    // clamped
    #[case(110, 0, 100)]
    #[case(90_000, 10_000_000, 100_000)]
    // out of range values are pulled back in
    #[case(50, 400_000, 100)]
    #[case(500_000, 400_000, 100_000)]
    fn new_difficulty(#[case] current: u64, #[case] credit: u64, #[case] expected: u64) {
        assert_eq!(
            expected,
            calculate_new_difficulty(current, credit, 300, 100, 100_000)
        );
    }

    #[rstest]
    #[case(1, 2)]
    #[case(4, 5)]
    #[case(5, 6)]
    #[case(10, 12)]
    fn raising_moves_at_least_one_step(#[case] current: u64, #[case] expected: u64) {
        assert_eq!(
            expected,
            calculate_new_difficulty(current, 600_001, 300, 1, 1_000_000)
        );
    }

    #[test]
    fn zero_credit_lowers_to_80_percent_or_floor() {
        assert_eq!(800, calculate_new_difficulty(1000, 0, 300, 1, 1_000_000));
        assert_eq!(900, calculate_new_difficulty(1000, 0, 300, 900, 1_000_000));
    }

    #[test]
    fn huge_difficulty_does_not_overflow() {
        assert_eq!(
            u64::MAX,
            calculate_new_difficulty(u64::MAX, u64::MAX, 1, 1, u64::MAX)
        );
    }

    proptest! {
        #[test]
        fn new_difficulty_within_bounds(
            current in any::<u64>(),
            credit in any::<u64>(),
            target in any::<u64>(),
            a in 1u64..,
            b in 1u64..,
        ) {
            let (min, max) = if a <= b { (a, b) } else { (b, a) };
            let d = calculate_new_difficulty(current, credit, target, min, max);
            prop_assert!(min <= d && d <= max);
        }
    }

    #[test]
    fn adjust_writes_back_through_registry() {
        let (registry, controller) = setup(0, 1);
        let farmer = registry.get(&LauncherId::new([0; 32])).unwrap();

        assert_eq!(800, controller.adjust_difficulty(&farmer).unwrap());
        let updated = registry.get(&farmer.launcher_id).unwrap();
        assert_eq!(800, updated.difficulty);
        assert!(updated.last_activity >= farmer.last_activity);
    }

    #[test]
    fn auto_adjust_runs_once_per_interval() {
        let (registry, controller) = setup(0, 3);

        let report = controller.auto_adjust_all(&registry.all()).unwrap();
        assert!(report.is_complete());
        assert_eq!(3, report.completed.len());

        // second call within the interval is a no-op
        assert!(controller.auto_adjust_all(&registry.all()).is_none());
        assert!(registry.all().iter().all(|f| f.difficulty == 800));
    }

    #[test]
    fn auto_adjust_reruns_after_interval() {
        let registry = Arc::new(FarmerRegistry::new(Arc::new(MemoryBridge::new())));
        registry
            .add(Farmer::new(LauncherId::new([1; 32]), "url", 1000))
            .unwrap();
        let cfg = DifficultyConfig {
            adjustment_interval: Duration::ZERO,
            ..cfg()
        };
        let controller = DifficultyController::new(&cfg, registry.clone(), history(0));

        controller.auto_adjust_all(&registry.all()).unwrap();
        controller.auto_adjust_all(&registry.all()).unwrap();
        assert_eq!(640, registry.all()[0].difficulty);
    }

    #[test]
    fn interval_counts_from_batch_start() {
        let mut bridge = MockStateBridge::new();
        bridge.expect_add_farmer().returning(|_| Ok(()));
        bridge.expect_update_farmer().returning(|_| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(())
        });
        let registry = Arc::new(FarmerRegistry::new(Arc::new(bridge)));
        registry
            .add(Farmer::new(LauncherId::new([1; 32]), "url", 1000))
            .unwrap();
        let cfg = DifficultyConfig {
            adjustment_interval: Duration::from_millis(100),
            ..cfg()
        };
        let controller = DifficultyController::new(&cfg, registry.clone(), history(0));

        let started = Instant::now();
        controller.auto_adjust_all(&registry.all()).unwrap();
        // the batch itself took a while, the next one is due an interval after it started
        std::thread::sleep(Duration::from_millis(100).saturating_sub(started.elapsed()));
        assert!(controller.auto_adjust_all(&registry.all()).is_some());
    }

    #[test]
    fn failed_batch_reports_progress_and_does_not_restart_interval() {
        let mut bridge = MockStateBridge::new();
        bridge.expect_add_farmer().returning(|_| Ok(()));
        let bad = LauncherId::new([2; 32]);
        bridge.expect_update_farmer().returning(move |f| {
            if f.launcher_id == bad {
                Err(BridgeError::Unavailable("down".into()))
            } else {
                Ok(())
            }
        });
        let registry = Arc::new(FarmerRegistry::new(Arc::new(bridge)));
        let farmers: Vec<_> = (1..=3u8)
            .map(|b| Farmer::new(LauncherId::new([b; 32]), "url", 1000))
            .collect();
        for f in &farmers {
            registry.add(f.clone()).unwrap();
        }
        let controller = DifficultyController::new(&cfg(), registry.clone(), history(0));

        let report = controller.auto_adjust_all(&farmers).unwrap();
        assert_eq!(vec![(farmers[0].launcher_id, 800)], report.completed);
        assert!(matches!(report.failed, Some((id, Error::Bridge { .. })) if id == bad));
        assert_eq!(vec![farmers[2].launcher_id], report.skipped);
        assert_eq!(1000, registry.get(&farmers[2].launcher_id).unwrap().difficulty);

        // the failed batch didn't count, so a retry runs immediately
        assert!(controller.auto_adjust_all(&farmers).is_some());
    }

    #[test]
    fn config_mutators_apply_to_later_calls_only() {
        let (registry, controller) = setup(0, 1);
        let id = LauncherId::new([0; 32]);

        controller.set_difficulty_range(2000, 3000).unwrap();
        // stored difficulty is not re-clamped
        assert_eq!(1000, registry.get(&id).unwrap().difficulty);
        assert_eq!(2000, controller.calculate_new_difficulty(1000, 0));

        controller.set_target_rate(1);
        assert_eq!(2400, controller.calculate_new_difficulty(2000, 2001));
        assert_eq!(1, controller.target_rate());
    }

    #[test]
    fn invalid_range_is_rejected() {
        let (_, controller) = setup(0, 0);
        assert!(controller.set_difficulty_range(0, 10).is_err());
        assert!(controller.set_difficulty_range(10, 9).is_err());
        assert_eq!((100, 100_000), controller.difficulty_range());
    }

    #[test]
    fn stats() {
        let (registry, controller) = setup(0, 0);
        let empty = controller.difficulty_stats(&[]);
        assert_eq!(0, empty.average_difficulty);
        assert_eq!(0, empty.total_farmers);

        for (b, d) in [(1u8, 100u64), (2, 200), (3, 600)] {
            registry
                .add(Farmer::new(LauncherId::new([b; 32]), "url", d))
                .unwrap();
        }
        let stats = controller.difficulty_stats(&registry.all());
        assert_eq!(300, stats.average_difficulty);
        assert_eq!(100, stats.min_difficulty);
        assert_eq!(600, stats.max_difficulty);
        assert_eq!(3, stats.total_farmers);
        assert_eq!(300, stats.target_partials_per_day);
    }
}
