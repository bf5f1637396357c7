mod admin;
mod buffer_pool;
mod capacity;
mod config;
mod dns;
mod metrics;
mod protocol;
mod proxy_protocol;
mod routing;
mod server;
mod splice;
mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::{CliArgs, Config};
use tokio::sync::Semaphore;

use buffer_pool::BufferPool;
use capacity::ConnectionLimiter;
use routing::RoutingTable;
use server::GatewayState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = Config::load(&args.config)?;

    let json_logs = std::env::var("PORTWAY_JSON_LOGS").map(|v| v == "1").unwrap_or(false);
    utils::logging::init(json_logs);
    let _sentry_guard = utils::sentry_init::init_sentry(Some(std::borrow::Cow::Borrowed(env!("CARGO_PKG_VERSION"))));

    let cancel = utils::shutdown::root();

    let client = orchestrator::client::build_client(config.kube_config_path.as_deref()).await?;

    let routing = RoutingTable::new();

    let watcher_client = client.clone();
    let watcher_table = routing.clone();
    let watcher_selector = config.label_selector.clone();
    let watcher_cancel = cancel.child_token();
    tokio::spawn(async move {
        if let Err(e) = watcher::run(watcher_client, watcher_selector, watcher_table, watcher_cancel).await {
            tracing::error!(error = %e, "routing watcher exited");
        }
    });

    let dns = dns::DnsCache::new();
    dns.spawn_sweeper(cancel.child_token());

    let pool = BufferPool::new(config.buffer_size);
    let limiter = ConnectionLimiter::new(config.max_connections);
    let inflight = Arc::new(Semaphore::new(config.max_connections));

    let state = Arc::new(GatewayState {
        routing,
        dns,
        pool,
        limiter,
        cluster_suffix: config.cluster_suffix.clone(),
        dial_timeout: config.dial_timeout,
        handshake_timeout: config.handshake_timeout,
        use_proxy_protocol: config.enable_proxy_protocol,
        inflight: inflight.clone(),
    });

    if let Some(metrics_addr) = config.metrics_addr.clone() {
        let admin_cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Ok(addr) = metrics_addr.parse() {
                if let Err(e) = admin::run(addr, admin_cancel).await {
                    tracing::error!(error = %e, "admin listener task failed");
                }
            } else {
                tracing::warn!(%metrics_addr, "invalid metrics_addr; admin surface disabled");
            }
        });
    }

    let addr: SocketAddr = config.listen_addr.parse()?;
    tracing::info!(%addr, "db gateway listening");

    let run_cancel = cancel.child_token();
    let max_connections = config.max_connections;
    if let Err(e) = server::run(addr, state, run_cancel).await {
        tracing::error!(error = %e, "listener task failed");
    }

    server::shutdown_grace(&cancel, inflight, max_connections).await;
    Ok(())
}
