//! fpmsyncd entry point.
//!
//! One FPM connection at a time; the kernel route socket runs alongside.
//! On warm restart the stored routes are echoed back as offloaded and the
//! replayed RIB is reconciled against them before live processing starts.

use anyhow::Context;
use clap::Parser;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use std::sync::Arc;
use switchd_fpmsyncd::fpm::FrameSplitter;
use switchd_fpmsyncd::route_sync::{RouteSync, WARM_TABLES};
use switchd_fpmsyncd::tables::CHANNEL_ROUTE_RESPONSE;
use switchd_orch_common::{MemStore, RedisConfig, RedisStore, Store};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Multicast groups for v4/v6 route updates on the kernel socket.
const RTMGRP_IPV4_ROUTE: u32 = 0x40;
const RTMGRP_IPV6_ROUTE: u32 = 0x400;

#[derive(Parser, Debug)]
#[command(name = "fpmsyncd", about = "FPM route-sync daemon")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    #[arg(long, default_value_t = 6379)]
    redis_port: u16,

    /// Use the in-memory store instead of redis (virtual platform).
    #[arg(long)]
    mem_store: bool,

    /// Unix socket the routing daemon connects to.
    #[arg(long, default_value = "/run/fpm.sock")]
    fpm_socket: String,

    /// Start in warm-restart mode.
    #[arg(long)]
    warm: bool,

    /// Hold offload echoes until the driver side confirms programming.
    #[arg(long)]
    suppression: bool,
}

async fn build_app_store(args: &Args) -> anyhow::Result<Arc<dyn Store>> {
    if args.mem_store {
        Ok(Arc::new(MemStore::new()))
    } else {
        Ok(Arc::new(
            RedisStore::connect(RedisConfig::new(args.redis_host.clone(), args.redis_port, 0))
                .await
                .context("connecting to the app store")?,
        ))
    }
}

/// Drains one FPM connection until it closes or shutdown is requested.
async fn serve_connection(
    stream: UnixStream,
    sync: &mut RouteSync,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    sync.set_echo_sender(echo_tx);

    // The routing daemon reconnected: everything already in the store is
    // programmed state it should mark as offloaded.
    if let Err(e) = sync.mark_routes_offloaded().await {
        warn!(error = %e, "failed to mark restored routes offloaded");
    }

    let mut splitter = FrameSplitter::new();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            Some(frame) = echo_rx.recv() => {
                writer.write_all(&frame).await.context("writing offload echo")?;
            }
            read = reader.read(&mut buf) => {
                let n = read.context("reading fpm stream")?;
                if n == 0 {
                    info!("fpm connection closed");
                    return Ok(());
                }
                splitter.push(&buf[..n]);
                loop {
                    match splitter.next_payload() {
                        Ok(Some(payload)) => sync.handle_payload(&payload).await,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "fpm framing error, dropping connection");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Kernel route updates, bridged onto a channel from a blocking reader.
fn spawn_kernel_listener(cancel: CancellationToken) -> mpsc::UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut socket = match Socket::new(NETLINK_ROUTE) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "kernel route socket unavailable");
                return;
            }
        };
        let addr = SocketAddr::new(0, RTMGRP_IPV4_ROUTE | RTMGRP_IPV6_ROUTE);
        if let Err(e) = socket.bind(&addr) {
            warn!(error = %e, "kernel route socket bind failed");
            return;
        }
        let mut buf = vec![0u8; 32 * 1024];
        while !cancel.is_cancelled() {
            match socket.recv(&mut &mut buf[..], 0) {
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "kernel route socket recv failed");
                    break;
                }
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(warm = args.warm, socket = %args.fpm_socket, "starting fpmsyncd");

    let app = build_app_store(&args).await?;
    let mut sync = RouteSync::new(app.clone());
    sync.set_suppression_enabled(args.suppression);

    if args.warm {
        sync.warm
            .load(app.as_ref(), &WARM_TABLES)
            .await
            .context("loading warm-restart state")?;
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal_cancel.cancel();
        }
    });

    // Driver-side confirmations drive the offload echo under suppression.
    let mut responses = app.consume_notifications(CHANNEL_ROUTE_RESPONSE).await?;

    let mut kernel_rx = spawn_kernel_listener(cancel.clone());

    let _ = std::fs::remove_file(&args.fpm_socket);
    let listener = UnixListener::bind(&args.fpm_socket)
        .with_context(|| format!("binding {}", args.fpm_socket))?;

    loop {
        info!("waiting for fpm connection");
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted.context("accepting fpm connection")?.0,
            Some(raw) = kernel_rx.recv() => {
                sync.handle_payload(&raw).await;
                continue;
            }
            Some(note) = responses.recv() => {
                sync.on_route_response(&note.data);
                continue;
            }
        };
        info!("fpm connected");

        // Serve until disconnect, still draining kernel and response events.
        let mut done = false;
        tokio::select! {
            result = serve_connection(stream, &mut sync, &cancel) => {
                if let Err(e) = result {
                    warn!(error = %e, "fpm connection failed");
                }
            }
            _ = cancel.cancelled() => done = true,
        }

        // The first reconnect after a warm start completes reconciliation.
        if args.warm {
            if let Err(e) = sync.finish_warm_restart().await {
                warn!(error = %e, "warm reconciliation failed");
            }
        }
        if done {
            break;
        }
    }

    info!("fpmsyncd stopped");
    Ok(())
}
