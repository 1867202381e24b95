use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pool::bridge::MemoryBridge;
use pool::PoolCoordinator;
use pool_service::configuration::{get_configuration, Config};
use pool_service::solver::SolverClient;
use pool_service::{router, scheduler};
use tracing::info;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yml", env("POOL_CONFIG_PATH"))]
    config_path: PathBuf,
}

async fn serve(config: Config, pool: Arc<PoolCoordinator>) -> eyre::Result<()> {
    scheduler::spawn(
        pool.clone(),
        config.pool.difficulty.adjustment_interval,
        config.settle_interval,
    );

    let app = router::new(pool, config.name, config.url);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("listening on: {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    LogTracer::init()?;
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = get_configuration(&args.config_path)?;
    config.validate()?;
    info!("using pool configuration: {:?}", config.pool);

    // the blocking solver client must be created and dropped outside of the runtime
    let solver = SolverClient::new(&config.solver_url, config.solver_timeout)?;
    let pool = Arc::new(PoolCoordinator::new(
        config.pool.clone(),
        Arc::new(MemoryBridge::new()),
        Arc::new(solver),
    )?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, pool.clone()))
}
