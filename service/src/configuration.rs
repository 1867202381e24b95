use std::path::Path;
use std::time::Duration;

use serde_with::{serde_as, DurationSeconds};
use tracing::info;

fn default_name() -> String {
    "pool-rs".to_string()
}

fn default_solver_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_settle_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

#[serde_as]
#[derive(serde::Deserialize, Clone, Debug)]
pub struct Config {
    /// The address to listen on for incoming requests.
    pub listen: std::net::SocketAddr,

    /// Pool name reported on `/pool_info`.
    #[serde(default = "default_name")]
    pub name: String,
    /// Public URL of the pool. Farmers registering without one get this.
    pub url: String,

    /// Base URL of the solver that validates partials.
    pub solver_url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_solver_timeout")]
    pub solver_timeout: Duration,

    /// How often balances above the minimum payout are settled.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_settle_interval")]
    pub settle_interval: Duration,

    #[serde(default)]
    pub pool: pool::config::PoolConfig,
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        self.pool.validate()?;
        eyre::ensure!(
            !self.settle_interval.is_zero(),
            "settle interval must be > 0"
        );
        eyre::ensure!(
            !self.pool.difficulty.adjustment_interval.is_zero(),
            "adjustment interval must be > 0"
        );
        eyre::ensure!(!self.solver_url.is_empty(), "solver url is required");
        Ok(())
    }
}

pub fn get_configuration(config_path: &Path) -> Result<Config, config::ConfigError> {
    info!("loading configuration from {config_path:?}");

    let config = config::Config::builder()
        .add_source(config::File::from(config_path).required(true))
        .add_source(
            config::Environment::with_prefix("POOL")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config.try_deserialize()
}
