//! CrashLoop Sweeper (spec.md §4.6): scans pods for persistent failure reasons and
//! scales the offending deployment to zero rather than letting the orchestrator keep
//! restarting a doomed pod.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::{info, warn};

use crate::status::StatusReporter;
use orchestrator::apply::get_opt;
use orchestrator::client::OrchestratorError;
use orchestrator::labels::{MANAGED_BY, SERVICE};
use orchestrator::names::deployment;

const FIELD_MANAGER: &str = "portway-orchestration-worker";

const WAITING_REASONS: &[&str] = &["ImagePullBackOff", "InvalidImageName", "ErrImagePull"];

pub async fn sweep_once(client: &Client, restart_threshold: i32, reporter: &dyn StatusReporter) -> Result<usize, OrchestratorError> {
    let pods: Api<Pod> = Api::all(client.clone());
    let listed = pods.list(&Default::default()).await?;

    let mut offenders: BTreeSet<(String, String)> = BTreeSet::new();
    for pod in &listed.items {
        let Some(labels) = pod.metadata.labels.as_ref() else { continue };
        if labels.get(MANAGED_BY).map(String::as_str) != Some("portway") {
            continue;
        }
        let Some(service_id) = labels.get(SERVICE) else { continue };
        let Some(namespace) = pod.metadata.namespace.clone() else { continue };

        if is_crashlooping(pod, restart_threshold) {
            offenders.insert((namespace, service_id.clone()));
        }
    }

    for (namespace, service_id) in &offenders {
        if let Err(e) = handle_offender(client, namespace, service_id, reporter).await {
            warn!(namespace, service_id, error = %e, "failed to act on crashlooping deployment");
        }
    }
    Ok(offenders.len())
}

fn is_crashlooping(pod: &Pod, restart_threshold: i32) -> bool {
    let Some(status) = &pod.status else { return false };
    let Some(statuses) = &status.container_statuses else { return false };
    statuses.iter().any(|cs| {
        let Some(waiting) = cs.state.as_ref().and_then(|s| s.waiting.as_ref()) else { return false };
        match waiting.reason.as_deref() {
            Some("CrashLoopBackOff") => cs.restart_count >= restart_threshold,
            Some(reason) => WAITING_REASONS.contains(&reason),
            None => false,
        }
    })
}

async fn handle_offender(client: &Client, namespace: &str, service_id: &str, reporter: &dyn StatusReporter) -> Result<(), OrchestratorError> {
    let name = deployment(service_id);
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    if get_opt(&api, &name).await?.is_none() {
        return Ok(());
    }
    info!(namespace, service_id, "scaling crashlooping deployment to zero");
    let patch = serde_json::json!({ "spec": { "replicas": 0 } });
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(&name, &params, &Patch::Apply(&patch)).await?;

    if let Err(e) = reporter.set_active(namespace, &name, false).await {
        warn!(namespace, deployment = %name, error = %e, "failed to record inactive status after crashloop");
    }
    if let Err(e) = reporter.set_crashloop(namespace, &name).await {
        warn!(namespace, deployment = %name, error = %e, "failed to record crashloop flag");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus};

    fn pod_with_waiting(reason: &str, restart_count: i32) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    restart_count,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting { reason: Some(reason.to_owned()), ..Default::default() }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn crashloop_backoff_below_threshold_is_ignored() {
        assert!(!is_crashlooping(&pod_with_waiting("CrashLoopBackOff", 2), 5));
    }

    #[test]
    fn crashloop_backoff_above_threshold_is_flagged() {
        assert!(is_crashlooping(&pod_with_waiting("CrashLoopBackOff", 6), 5));
    }

    #[test]
    fn image_pull_backoff_is_flagged_regardless_of_restart_count() {
        assert!(is_crashlooping(&pod_with_waiting("ImagePullBackOff", 0), 5));
    }

    #[test]
    fn running_container_is_not_flagged() {
        let pod = Pod { status: Some(PodStatus { container_statuses: Some(vec![ContainerStatus { restart_count: 0, ..Default::default() }]), ..Default::default() }), ..Default::default() };
        assert!(!is_crashlooping(&pod, 5));
    }
}
