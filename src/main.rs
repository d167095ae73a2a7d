use clap::Parser;
use sftpool::config::{Config, LoggingConfig};
use sftpool::session::MemoryProvider;
use sftpool::{PoolConfig, PoolError, Result, SessionPool, TaskExecutor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sftpool")]
#[command(about = "Pooled remote file-transfer sessions", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Generate example configuration file
    #[arg(long, value_name = "FILE")]
    generate_config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Exercise the configured pool against the in-memory endpoint
    #[arg(long)]
    self_check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle config generation
    if let Some(config_path) = args.generate_config {
        println!("Generating example configuration file: {:?}", config_path);
        Config::create_example(&config_path)?;
        println!("Example configuration file created successfully!");
        println!("Edit the file and run: sftpool --config {:?}", config_path);
        return Ok(());
    }

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => Config::default(),
    };

    let mut logging = config.logging.clone();
    if let Some(level) = args.log_level {
        logging.level = level;
    }
    init_logging(&logging)?;

    info!("sftpool v{} starting", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Loaded configuration from: {:?}", path),
        None => info!("No configuration file specified, using defaults"),
    }

    let pool_config = PoolConfig::from_settings(&config);
    info!(
        target_addr = %pool_config.target.addr(),
        username = %pool_config.target.username,
        pool_size = pool_config.max_size,
        thread_size = config.pool.thread_size,
        idle_timeout_secs = pool_config.idle_timeout.as_secs(),
        borrow_timeout_secs = pool_config.borrow_timeout.as_secs(),
        "Effective pool settings"
    );

    if args.self_check {
        if let Err(e) = self_check(pool_config, config.pool.thread_size).await {
            error!("Self-check failed: {}", e);
            return Err(e);
        }
        info!("Self-check passed");
    }

    Ok(())
}

async fn self_check(pool_config: PoolConfig, thread_size: usize) -> Result<()> {
    let provider = MemoryProvider::new(pool_config.target.clone());
    provider.put_file("/self-check/payload.bin", b"sftpool self-check".to_vec());

    let pool = Arc::new(SessionPool::connect(pool_config, Arc::new(provider.clone())).await?);
    let executor = TaskExecutor::new(Arc::clone(&pool), thread_size);

    if !pool.is_available().await {
        return Err(PoolError::Connect("pool reported no usable session".to_string()));
    }

    let scratch = std::env::temp_dir().join(format!("sftpool-self-check-{}.bin", std::process::id()));
    let downloaded = executor
        .download("/self-check/payload.bin", scratch.clone())
        .await?;
    let removed = executor.remove("/self-check/payload.bin").await?;
    let _ = tokio::fs::remove_file(&scratch).await;

    executor.shutdown().await;
    let stats = pool.stats();
    pool.shutdown().await;

    info!(
        downloaded,
        removed,
        created = stats.created_total,
        idle = stats.idle,
        "Self-check finished"
    );

    if downloaded && removed {
        Ok(())
    } else {
        Err(PoolError::TaskFailed(
            "self-check transfer did not complete".to_string(),
        ))
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_new(&logging.level)
        .map_err(|e| PoolError::Config(format!("Invalid log level: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    Ok(())
}
