//! vlanmgrd entry point.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use switchd_cfgmgr_common::ShellLinkCtl;
use switchd_orch_common::{
    Executor, MemStore, RedisConfig, RedisStore, Scheduler, Store, Stores, WakeEvent,
};
use switchd_types::MacAddress;
use switchd_vlanmgrd::tables::{CFG_VLAN_MEMBER_TABLE, CFG_VLAN_TABLE, CHANNEL_VLANSTATE};
use switchd_vlanmgrd::VlanMgr;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vlanmgrd", about = "VLAN configuration manager daemon")]
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

    /// Device MAC used for the bridge and VLAN netdevs; read from
    /// DEVICE_METADATA when omitted.
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

/// Reads the device MAC from DEVICE_METADATA, as teamd and the bridge need
/// a stable hardware address.
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
    info!(warm = args.warm, "starting vlanmgrd");

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
    for table in [CFG_VLAN_TABLE, CFG_VLAN_MEMBER_TABLE] {
        scheduler.register(Executor::Table(stores.cfg.subscribe(table).await?));
    }
    scheduler.register(Executor::Notification(
        stores.app.consume_notifications(CHANNEL_VLANSTATE).await?,
    ));

    let mut mgr = VlanMgr::new(stores, Arc::new(ShellLinkCtl), mac, args.warm);
    mgr.init().await.context("initializing vlanmgrd")?;
    mgr.drain().await;

    while let Some(wake) = scheduler.next().await {
        match wake {
            WakeEvent::Table { table, entry } => mgr.enqueue(&table, entry),
            WakeEvent::Notification { note, .. } => {
                mgr.handle_vlan_state_notification(&note).await
            }
            WakeEvent::Timer { .. } => {}
        }
        mgr.drain().await;
    }
    scheduler.close();
    info!("vlanmgrd stopped");
    Ok(())
}
