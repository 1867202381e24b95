use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::payment::PaymentStrategy;

/// Difficulty retargeting parameters.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyConfig {
    /// Difficulty assigned to newly registered farmers.
    pub initial: u64,
    pub min: u64,
    pub max: u64,
    /// How many partials per day a farmer should be sending.
    pub target_partials_per_day: u64,
    /// Minimum time between two pool-wide retargets.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub adjustment_interval: Duration,
}

impl Default for DifficultyConfig {
    fn default() -> Self {
        Self {
            initial: 1,
            min: 1,
            max: 1_000_000,
            target_partials_per_day: 300,
            adjustment_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub strategy: PaymentStrategy,
    /// Pool fee in percent, `1.0` is 1%.
    pub fee_percent: f64,
    /// Payouts below this amount are never made.
    pub min_payout: u64,
    /// N for PPLNS, in credit units.
    pub pplns_window: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            strategy: PaymentStrategy::Pplns,
            fee_percent: 1.0,
            min_payout: 1_000_000_000,
            pplns_window: 3_000_000,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub difficulty: DifficultyConfig,
    pub payments: PaymentConfig,
    /// A farmer counts as active if it did something within this window.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub active_window: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            difficulty: DifficultyConfig::default(),
            payments: PaymentConfig::default(),
            active_window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> eyre::Result<()> {
        let d = &self.difficulty;
        eyre::ensure!(d.min > 0, "min difficulty must be > 0");
        eyre::ensure!(
            d.min <= d.max,
            format!("min difficulty ({}) cannot exceed max ({})", d.min, d.max)
        );
        eyre::ensure!(
            (d.min..=d.max).contains(&d.initial),
            format!(
                "initial difficulty ({}) outside [{}, {}]",
                d.initial, d.min, d.max
            )
        );

        let p = &self.payments;
        eyre::ensure!(
            (0.0..=100.0).contains(&p.fee_percent),
            format!("invalid pool fee: {:.2}", p.fee_percent)
        );
        eyre::ensure!(p.pplns_window > 0, "PPLNS window must be > 0");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::PoolConfig;

    #[test]
    fn default_is_valid() {
        PoolConfig::default().validate().unwrap();
    }

    #[test]
    fn deserialize_partial_config() {
        let cfg: PoolConfig = serde_json::from_str(
            r#"{
                "difficulty": { "max": 5000, "adjustment_interval": 600 },
                "payments": { "strategy": "pps", "fee_percent": 2.5 }
            }"#,
        )
        .unwrap();
        assert_eq!(5000, cfg.difficulty.max);
        assert_eq!(1, cfg.difficulty.min);
        assert_eq!(600, cfg.difficulty.adjustment_interval.as_secs());
        assert_eq!(crate::payment::PaymentStrategy::Pps, cfg.payments.strategy);
        assert_eq!(2.5, cfg.payments.fee_percent);
        assert_eq!(1_000_000_000, cfg.payments.min_payout);
    }

    #[rstest]
    #[case(|c: &mut PoolConfig| c.difficulty.min = 0)]
    #[case(|c: &mut PoolConfig| c.difficulty.max = 0)]
    #[case(|c: &mut PoolConfig| c.difficulty.initial = 2_000_000)]
    #[case(|c: &mut PoolConfig| c.payments.fee_percent = -0.5)]
    #[case(|c: &mut PoolConfig| c.payments.fee_percent = 100.5)]
    #[case(|c: &mut PoolConfig| c.payments.pplns_window = 0)]
    fn rejects_invalid(#[case] break_it: fn(&mut PoolConfig)) {
        let mut cfg = PoolConfig::default();
        break_it(&mut cfg);
        assert!(cfg.validate().is_err());
    }
}
