//! Scale-to-zero wake-up protocol (spec.md §4.1 "Wake-up protocol"), triggered only for
//! backends bearing `scaleToZeroEnabled=true`.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use kv::{keys, Store};
use serde_json::json;

use crate::routing::Backend;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const WAKE_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Ready to proxy immediately (already active, or became ready within the deadline).
    Ready,
    /// Deployment is crash-looping; spec.md says return 503 with no retry attempted.
    CrashLoop,
    /// Deployment did not become ready within the 30s deadline.
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum WakeError {
    #[error("kv store error: {0}")]
    Store(#[from] kv::KvError),
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] orchestrator::OrchestratorError),
}

impl utils::error::ReportableError for WakeError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        match self {
            WakeError::Store(_) => utils::error::ErrorKind::Store,
            WakeError::Orchestrator(_) => utils::error::ErrorKind::Orchestrator,
        }
    }
}

/// Ensures `backend`'s deployment is serving traffic, following spec.md §4.1 steps 1-4.
/// A no-op (returns [`WakeOutcome::Ready`] immediately) when `scale_to_zero_enabled` is
/// false, since the protocol is only triggered for that flag.
pub async fn ensure_awake(client: &Client, store: &Store, backend: &Backend) -> Result<WakeOutcome, WakeError> {
    if !backend.scale_to_zero_enabled {
        return Ok(WakeOutcome::Ready);
    }

    // The watched Service's object name is `<serviceId>-service`; the Deployment the
    // worker creates and the `active?`/`crashloop?` keys it writes are all keyed on
    // `<serviceId>-deployment` (spec.md §6). Derive that name from `service_id`, never
    // from `backend.name`, so this lines up with `names.rs`/`status.rs`/`idle_scaler.rs`.
    let deployment_name = orchestrator::names::deployment(&backend.service_id);

    let crashloop_key = keys::deployment_crashloop(&backend.namespace, &deployment_name);
    if store.exists(&crashloop_key).await? {
        return Ok(WakeOutcome::CrashLoop);
    }

    let status_key = keys::deployment_status(&backend.namespace, &deployment_name);
    if store.get(&status_key).await?.as_deref() == Some(keys::STATUS_ACTIVE) {
        return Ok(WakeOutcome::Ready);
    }

    let api: Api<Deployment> = Api::namespaced(client.clone(), &backend.namespace);

    if is_ready(&api, &deployment_name).await? {
        store.set_ex(&status_key, keys::STATUS_ACTIVE, keys::TTL_DEPLOYMENT_STATUS).await?;
        return Ok(WakeOutcome::Ready);
    }

    let patch = json!({ "spec": { "replicas": 1 } });
    api.patch(&deployment_name, &PatchParams::default(), &Patch::Merge(patch)).await?;

    let deadline = tokio::time::Instant::now() + WAKE_DEADLINE;
    loop {
        if is_ready(&api, &deployment_name).await? {
            store.set_ex(&status_key, keys::STATUS_ACTIVE, keys::TTL_DEPLOYMENT_STATUS).await?;
            return Ok(WakeOutcome::Ready);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(WakeOutcome::Timeout);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn is_ready(api: &Api<Deployment>, name: &str) -> Result<bool, orchestrator::OrchestratorError> {
    let Some(deployment) = orchestrator::apply::get_opt(api, name).await? else {
        return Ok(false);
    };
    let Some(status) = deployment.status else { return Ok(false) };
    let wanted = deployment.spec.and_then(|s| s.replicas).unwrap_or(1);
    Ok(status.ready_replicas.unwrap_or(0) >= wanted && wanted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_deadline_matches_spec() {
        assert_eq!(WAKE_DEADLINE, Duration::from_secs(30));
        assert_eq!(POLL_INTERVAL, Duration::from_secs(1));
    }

    #[test]
    fn deployment_name_is_derived_from_service_id_not_backend_name() {
        let backend = Backend {
            namespace: "acme-blog".into(),
            name: "web-1-service".into(),
            port: 8080,
            scale_to_zero_enabled: true,
            service_id: "web-1".into(),
        };
        let name = orchestrator::names::deployment(&backend.service_id);
        assert_eq!(name, "web-1-deployment");
        assert_ne!(name, backend.name);
    }
}
