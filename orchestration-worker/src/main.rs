mod admin;
mod autoscaler;
mod config;
mod config_map;
mod crashloop;
mod deployment;
mod env_secret;
mod handlers;
mod manifests;
mod metrics;
mod names;
mod namespace;
mod pull_secret;
mod service;
mod status;
mod storage;

use clap::Parser;
use config::{CliArgs, Config};
use kv::Store;

use handlers::Handlers;
use status::KvStatusReporter;

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

    let handlers = Handlers {
        client: client.clone(),
        http: reqwest::Client::new(),
        cloud_registry_api_url: config.cloud_registry_api_url.clone(),
        cloud_registry_host: config.cloud_registry_host.clone(),
        readiness_timeout: config.readiness_timeout,
        reporter: Box::new(KvStatusReporter::new(store.clone())),
    };

    let mut tasks: tokio::task::JoinSet<anyhow::Result<()>> = tokio::task::JoinSet::new();

    let consumer_store = store.clone();
    let queue_name = config.queue_name.clone();
    let consumer_cancel = cancel.child_token();
    tasks.spawn(async move {
        queue::consumer::run_consumer(&consumer_store, &queue_name, &handlers, &consumer_cancel).await;
        Ok(())
    });

    let crashloop_client = client.clone();
    let crashloop_reporter = KvStatusReporter::new(store.clone());
    let crashloop_interval = config.crashloop_sweep_interval;
    let crashloop_threshold = config.crashloop_restart_threshold;
    let crashloop_cancel = cancel.child_token();
    tasks.spawn(async move {
        run_crashloop_sweeper(crashloop_client, crashloop_reporter, crashloop_interval, crashloop_threshold, crashloop_cancel).await;
        Ok(())
    });

    if let Some(metrics_addr) = config.metrics_addr.clone() {
        let addr: std::net::SocketAddr = metrics_addr.parse()?;
        let admin_cancel = cancel.child_token();
        tasks.spawn(async move { admin::run(addr, admin_cancel).await });
    }

    tracing::info!("orchestration worker running");

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result? {
            tracing::error!(error = %e, "background task failed");
        }
    }

    Ok(())
}

async fn run_crashloop_sweeper(
    client: kube::Client,
    reporter: KvStatusReporter,
    interval: std::time::Duration,
    threshold: i32,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let started = std::time::Instant::now();
                match crashloop::sweep_once(&client, threshold, &reporter).await {
                    Ok(count) => {
                        metrics::METRICS.record_crashloop_sweep("success");
                        tracing::debug!(count, elapsed_ms = started.elapsed().as_millis() as u64, "crashloop sweep complete");
                    }
                    Err(e) => {
                        metrics::METRICS.record_crashloop_sweep("failure");
                        tracing::warn!(error = %e, "crashloop sweep failed");
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}
