//! teammgrd entry point.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use switchd_cfgmgr_common::ShellLinkCtl;
use switchd_orch_common::{
    Executor, MemStore, Operation, RedisConfig, RedisStore, Scheduler, Store, Stores, WakeEvent,
};
use switchd_teammgrd::tables::{CFG_LAG_MEMBER_TABLE, CFG_LAG_TABLE, STATE_PORT_TABLE};
use switchd_teammgrd::{ShellTeamCtl, TeamMgr};
use switchd_types::MacAddress;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "teammgrd", about = "Link aggregation manager daemon")]
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

    /// Device MAC for teamd hwaddr; read from DEVICE_METADATA when omitted.
    #[arg(long)]
    device_mac: Option<MacAddress>,
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

async fn device_mac(stores: &Stores, args: &Args) -> anyhow::Result<MacAddress> {
    if let Some(mac) = args.device_mac {
        return Ok(mac);
    }
    let metadata = stores
        .cfg
        .get("DEVICE_METADATA", "localhost")
        .await
        .context("reading device metadata")?
        .unwrap_or_default();
    metadata
        .iter()
        .find(|(f, _)| f == "mac")
        .and_then(|(_, v)| v.parse().ok())
        .context("device MAC missing from DEVICE_METADATA")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(warm = args.warm, "starting teammgrd");

    let stores = build_stores(&args).await?;
    let mac = device_mac(&stores, &args).await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    let mut scheduler = Scheduler::new(cancel);
    for table in [CFG_LAG_TABLE, CFG_LAG_MEMBER_TABLE] {
        scheduler.register(Executor::Table(stores.cfg.subscribe(table).await?));
    }
    scheduler.register(Executor::Table(
        stores.state.subscribe(STATE_PORT_TABLE).await?,
    ));

    let mut mgr = TeamMgr::new(stores, Arc::new(ShellLinkCtl), Arc::new(ShellTeamCtl), mac, args.warm);
    mgr.init().await.context("initializing teammgrd")?;
    mgr.drain().await;

    while let Some(wake) = scheduler.next().await {
        if let WakeEvent::Table { table, entry } = wake {
            if table == STATE_PORT_TABLE {
                if entry.op == Operation::Set {
                    mgr.handle_port_state(&entry.key).await;
                }
            } else {
                mgr.enqueue(&table, entry);
            }
        }
        mgr.drain().await;
    }
    scheduler.close();
    info!("teammgrd stopped");
    Ok(())
}
