//! orchd entry point.

use anyhow::Context;
use clap::Parser;
use orchd::daemon::{Directory, OrchDaemon};
use std::sync::Arc;
use switchd_asic::{MockAsic, Platform};
use switchd_orch_common::{MemStore, RedisConfig, RedisStore, Store, Stores};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "orchd", about = "Switch orchestration daemon")]
struct Args {
    /// Redis host for the store gateway.
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis port for the store gateway.
    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    /// Use the in-memory store instead of redis (virtual platform).
    #[arg(long)]
    mem_store: bool,

    /// Start in warm-restart mode, replaying persisted state.
    #[arg(long)]
    warm: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(warm = args.warm, "starting orchd");

    // Namespace -> redis database mapping: app 0, cfg 4, state 6.
    let stores = if args.mem_store {
        Stores::new(
            Arc::new(MemStore::new()),
            Arc::new(MemStore::new()),
            Arc::new(MemStore::new()),
        )
    } else {
        let connect = |db: u8| {
            RedisConfig::new(args.redis_host.clone(), args.redis_port, db)
        };
        let cfg: Arc<dyn Store> = Arc::new(
            RedisStore::connect(connect(4))
                .await
                .context("connecting to the config store")?,
        );
        let app: Arc<dyn Store> = Arc::new(
            RedisStore::connect(connect(0))
                .await
                .context("connecting to the app store")?,
        );
        let state: Arc<dyn Store> = Arc::new(
            RedisStore::connect(connect(6))
                .await
                .context("connecting to the state store")?,
        );
        Stores::new(cfg, app, state)
    };

    // The virtual-platform adapter; a hardware build swaps in the SDK-backed
    // implementation here.
    let asic = Arc::new(MockAsic::new().with_platform(Platform::Virtual));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    let directory = Directory::new(stores, asic);
    let mut daemon = OrchDaemon::new(directory, args.warm, cancel)
        .await
        .context("building orchd")?;
    daemon.init().await.context("initializing orchd")?;
    daemon.run().await;

    Ok(())
}
