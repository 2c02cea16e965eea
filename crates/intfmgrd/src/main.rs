//! intfmgrd entry point.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use switchd_cfgmgr_common::ShellLinkCtl;
use switchd_intfmgrd::tables::{CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE};
use switchd_intfmgrd::IntfMgr;
use switchd_orch_common::{
    Executor, MemStore, RedisConfig, RedisStore, Scheduler, Store, Stores, WakeEvent,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "intfmgrd", about = "Interface configuration manager daemon")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    /// Use the in-memory store instead of redis (virtual platform).
    #[arg(long)]
    mem_store: bool,

    /// Start in warm-restart mode.
    #[arg(long)]
    warm: bool,
}

async fn build_stores(args: &Args) -> anyhow::Result<Stores> {
    if args.mem_store {
        return Ok(Stores::new(
            Arc::new(MemStore::new()),
            Arc::new(MemStore::new()),
            Arc::new(MemStore::new()),
        ));
    }
    let connect = |db: u8| RedisConfig::new(args.redis_host.clone(), args.redis_port, db);
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
    Ok(Stores::new(cfg, app, state))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(warm = args.warm, "starting intfmgrd");

    let stores = build_stores(&args).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    let mut scheduler = Scheduler::new(cancel);
    for table in [CFG_INTF_TABLE, CFG_VLAN_INTF_TABLE] {
        scheduler.register(Executor::Table(stores.cfg.subscribe(table).await?));
    }
    // State-table changes unblock pending preconditions.
    for table in ["PORT_TABLE", "LAG_TABLE", "VLAN_TABLE", "VRF_TABLE"] {
        scheduler.register(Executor::Table(stores.state.subscribe(table).await?));
    }

    let mut mgr = IntfMgr::new(stores, Arc::new(ShellLinkCtl), args.warm);
    mgr.init().await.context("initializing intfmgrd")?;
    mgr.drain().await;

    while let Some(wake) = scheduler.next().await {
        if let WakeEvent::Table { table, entry } = wake {
            if table == CFG_INTF_TABLE || table == CFG_VLAN_INTF_TABLE {
                mgr.enqueue(&table, entry);
            }
            // State-table wakes only trigger the re-drive below.
        }
        mgr.drain().await;
    }
    scheduler.close();
    info!("intfmgrd stopped");
    Ok(())
}
