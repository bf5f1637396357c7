mod access_log;
mod cert;
mod config;
mod dns;
mod idle_scaler;
mod metrics;
mod proxy;
mod routing;
mod server;
mod wakeup;
mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{CliArgs, Config};
use kv::Store;

use cert::acme::AcmeClient;
use cert::challenge::ChallengeTable;
use cert::resolver::GatewayCertResolver;
use cert::wildcard::WildcardManager;
use cert::CertStore;
use proxy::ProxyTimeouts;
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
    let store = Store::connect(&config.redis_addr, config.redis_password.as_deref(), config.redis_db).await?;

    if args.timer {
        run_idle_scaler(&config, client, store, cancel).await?;
        return Ok(());
    }

    run_gateway(&config, client, store, cancel).await
}

async fn run_idle_scaler(
    config: &Config,
    client: kube::Client,
    store: Store,
    cancel: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!("starting idle scaler");
    idle_scaler::run(
        client,
        store,
        config.label_selector.clone(),
        Duration::from_secs(config.idle_timeout_minutes * 60),
        Duration::from_secs(config.check_interval_seconds),
        cancel,
    )
    .await;
    Ok(())
}

async fn run_gateway(config: &Config, client: kube::Client, store: Store, cancel: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
    let routing = RoutingTable::new();
    let dns = dns::DnsCache::new();
    dns.spawn_sweeper(cancel.child_token());

    let watcher_client = client.clone();
    let watcher_table = routing.clone();
    let watcher_selector = config.label_selector.clone();
    let watcher_cancel = cancel.child_token();
    tokio::spawn(async move {
        if let Err(e) = watcher::run(watcher_client, watcher_selector, watcher_table, watcher_cancel).await {
            tracing::error!(error = %e, "routing watcher exited");
        }
    });

    let challenges = Arc::new(ChallengeTable::new(config.acme_challenge_dir.clone()));

    let cert_store = CertStore::new(store.clone(), client.clone());
    cert_store.spawn_sweeper(cancel.child_token());

    let wildcard = if config.enable_wildcard {
        let (domain, token) = (
            config.wildcard_domain.clone().expect("validated at config load"),
            config.cloudflare_api_token.clone().expect("validated at config load"),
        );
        Some(Arc::new(WildcardManager::new(domain, String::new(), token)?))
    } else {
        None
    };

    let acme = Arc::new(AcmeClient::bootstrap(&store, &config.acme_server_url, &config.email, challenges.clone()).await?);

    let proxy_timeouts = ProxyTimeouts { read: config.proxy_read_timeout, write: config.proxy_write_timeout };
    let websocket_timeouts = ProxyTimeouts { read: config.websocket_read_timeout, write: config.websocket_write_timeout };

    let state = Arc::new(GatewayState {
        routing,
        dns,
        store: store.clone(),
        client: client.clone(),
        challenges: challenges.clone(),
        cluster_suffix: config.cluster_suffix.clone(),
        enable_https: config.enable_https,
        proxy_timeouts,
        websocket_timeouts,
    });

    let mut tasks = tokio::task::JoinSet::new();

    let http_addr: SocketAddr = config.http_addr.parse()?;
    let http_state = state.clone();
    let http_cancel = cancel.child_token();
    tasks.spawn(async move { server::run_plaintext(http_addr, http_state, http_cancel).await });

    if config.enable_https {
        let https_addr: SocketAddr = config.https_addr.parse()?;
        let resolver = GatewayCertResolver::new(cert_store.clone(), acme.clone(), wildcard.clone(), None);
        let https_state = state.clone();
        let https_cancel = cancel.child_token();
        tasks.spawn(async move { server::run_tls(https_addr, https_state, resolver, https_cancel).await });

        cert::renewal::spawn(state.routing.clone(), cert_store.clone(), acme.clone(), wildcard.clone(), cancel.child_token());
    }

    tracing::info!("web gateway listening");

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result? {
            tracing::error!(error = %e, "listener task failed");
        }
    }

    server::shutdown_grace(&cancel).await;
    Ok(())
}
