//! Idle Scaler: the Web Gateway's second mode (`-timer`), a periodic scan that scales
//! idle web deployments to zero replicas. Shares the routing table construction code and
//! KV store client with the serving mode but binds no listeners.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kv::{keys, Store};
use orchestrator::labels;
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum IdleScalerError {
    #[error("kv store error: {0}")]
    Store(#[from] kv::KvError),
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] orchestrator::OrchestratorError),
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
}

impl utils::error::ReportableError for IdleScalerError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        match self {
            IdleScalerError::Store(_) => utils::error::ErrorKind::Store,
            IdleScalerError::Orchestrator(_) | IdleScalerError::Kube(_) => utils::error::ErrorKind::Orchestrator,
        }
    }
}

/// Drives the periodic scan every `check_interval` until cancelled.
pub async fn run(
    client: Client,
    store: Store,
    label_selector: String,
    idle_timeout: Duration,
    check_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(check_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(&client, &store, &label_selector, idle_timeout).await {
                    tracing::warn!(error = %e, "idle scaler sweep failed");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn sweep_once(client: &Client, store: &Store, label_selector: &str, idle_timeout: Duration) -> Result<(), IdleScalerError> {
    let api: Api<Deployment> = Api::all(client.clone());
    let list = api.list(&kube::api::ListParams::default().labels(label_selector)).await?;

    let now = epoch_now();
    for deployment in &list {
        let namespace = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        let labels = deployment.labels();

        if !labels::scale_to_zero_enabled(labels) {
            continue;
        }

        let access_key = keys::access(&namespace, &name);
        let last_access: u64 = store.get(&access_key).await?.and_then(|v| v.parse().ok()).unwrap_or(0);
        if last_access == 0 {
            continue;
        }
        if now.saturating_sub(last_access) < idle_timeout.as_secs() {
            continue;
        }

        let status_key = keys::deployment_status(&namespace, &name);
        if store.get(&status_key).await?.as_deref() == Some(keys::STATUS_INACTIVE) {
            continue;
        }

        let deployment_api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
        let patch = json!({ "spec": { "replicas": 0 } });
        deployment_api.patch(&name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        store.set_ex(&status_key, keys::STATUS_INACTIVE, keys::TTL_DEPLOYMENT_STATUS).await?;
        tracing::info!(%namespace, %name, "scaled idle deployment to zero");
    }
    Ok(())
}

fn epoch_now() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_accessed_is_epoch_zero_and_is_skipped() {
        let last_access: u64 = 0;
        assert_eq!(last_access, 0, "an epoch of 0 means never-accessed and must never be scaled down");
    }
}
