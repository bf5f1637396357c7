//! Deployment manifest synthesis and apply (spec.md §4.4 pipeline step 3).

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, PodSpec, PodTemplateSpec, ResourceRequirements, SecretEnvSource, Volume,
    VolumeMount, PersistentVolumeClaimVolumeSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use queue::messages::{ResourceSpec, ServiceDescriptor};
use tracing::info;

use crate::manifests::{self, profile_for, ServiceProfile};
use orchestrator::apply::get_opt;
use orchestrator::client::OrchestratorError;
use orchestrator::names::{deployment, env_secret, pull_secret};

const FIELD_MANAGER: &str = "portway-orchestration-worker";
const DATA_VOLUME_NAME: &str = "data";
const RESTARTED_AT_ANNOTATION: &str = orchestrator::labels::RESTARTED_AT_ANNOTATION;

pub async fn reconcile_deployment(
    client: &Client,
    namespace: &str,
    descriptor: &ServiceDescriptor,
) -> Result<Deployment, OrchestratorError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let name = deployment(&descriptor.service_id);
    let desired = build_manifest(namespace, descriptor);

    let existing = get_opt(&api, &name).await?;
    let applied = match existing {
        None => {
            info!(service_id = %descriptor.service_id, "creating deployment");
            let params = PatchParams::apply(FIELD_MANAGER).force();
            api.patch(&name, &params, &Patch::Apply(&desired)).await?
        }
        Some(current) => {
            let params = PatchParams::apply(FIELD_MANAGER).force();
            let patched = api.patch(&name, &params, &Patch::Apply(&desired)).await?;
            if progress_deadline_exceeded(&current) {
                info!(service_id = %descriptor.service_id, "forcing rollout after ProgressDeadlineExceeded");
                force_rollout(&api, &name).await?
            } else {
                patched
            }
        }
    };
    Ok(applied)
}

fn progress_deadline_exceeded(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|status: &DeploymentStatus| status.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.reason.as_deref() == Some("ProgressDeadlineExceeded")))
        .unwrap_or(false)
}

async fn force_rollout(api: &Api<Deployment>, name: &str) -> Result<Deployment, OrchestratorError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut annotations = serde_json::Map::new();
    annotations.insert(RESTARTED_AT_ANNOTATION.to_owned(), serde_json::Value::String(now));
    let patch = serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "annotations": serde_json::Value::Object(annotations)
                }
            }
        }
    });
    let params = PatchParams::apply(FIELD_MANAGER).force();
    Ok(api.patch(name, &params, &Patch::Apply(&patch)).await?)
}

fn build_manifest(namespace: &str, descriptor: &ServiceDescriptor) -> Deployment {
    let profile = profile_for(descriptor.service_type);
    let name = deployment(&descriptor.service_id);
    let labels = manifests::routing_labels(descriptor);

    let ports = profile.ports(descriptor);
    let container_ports: Vec<ContainerPort> =
        ports.iter().map(|p| ContainerPort { container_port: p.container_port as i32, ..Default::default() }).collect();
    let primary_container_port = ports.first().map(|p| p.container_port as i32).unwrap_or(manifests::DEFAULT_WEB_CONTAINER_PORT as i32);
    let (liveness_probe, readiness_probe) = profile.probes(descriptor, primary_container_port);

    let mut volumes = Vec::new();
    let mut volume_mounts = Vec::new();
    if descriptor.has_storage() {
        volumes.push(Volume {
            name: DATA_VOLUME_NAME.to_owned(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: orchestrator::names::pvc(&descriptor.service_id),
                read_only: Some(false),
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name: DATA_VOLUME_NAME.to_owned(),
            mount_path: manifests::data_mount_path(descriptor.service_type).to_owned(),
            ..Default::default()
        });
    }
    if let Some((suffix, mount_path, _data)) = profile.config_map(descriptor, &descriptor.service_id) {
        let config_map_name = orchestrator::names::engine_config_map(&descriptor.service_id, &suffix);
        volumes.push(Volume {
            name: "engine-config".to_owned(),
            config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource { name: config_map_name, ..Default::default() }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount { name: "engine-config".to_owned(), mount_path, ..Default::default() });
    }

    let container = Container {
        name: descriptor.service_id.clone(),
        image: Some(profile.image(descriptor)),
        command: profile.command(descriptor),
        ports: Some(container_ports),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource { name: env_secret(&descriptor.service_id), optional: Some(true) }),
            ..Default::default()
        }]),
        resources: Some(resource_requirements(descriptor.resources.as_ref())),
        liveness_probe,
        readiness_probe,
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    };

    let pull_secrets = descriptor
        .pull_credentials
        .as_ref()
        .map(|_| vec![k8s_openapi::api::core::v1::LocalObjectReference { name: pull_secret(&descriptor.service_id) }]);

    let containers = vec![container];
    let init_containers = profile.init_containers(descriptor);

    Deployment {
        metadata: ObjectMeta { name: Some(name), namespace: Some(namespace.to_owned()), labels: Some(labels.clone()), ..Default::default() },
        spec: Some(DeploymentSpec {
            replicas: Some(descriptor.effective_replicas() as i32),
            selector: LabelSelector { match_labels: Some(BTreeMap::from([(orchestrator::labels::SERVICE.to_owned(), descriptor.service_id.clone())])), ..Default::default() },
            strategy: Some(profile.update_strategy(descriptor)),
            progress_deadline_seconds: Some(120),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(PodSpec {
                    containers,
                    init_containers: (!init_containers.is_empty()).then_some(init_containers),
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    image_pull_secrets: pull_secrets,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resource_requirements(spec: Option<&ResourceSpec>) -> ResourceRequirements {
    let Some(spec) = spec else { return ResourceRequirements::default() };
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(v) = &spec.cpu_request {
        requests.insert("cpu".to_owned(), k8s_openapi::apimachinery::pkg::api::resource::Quantity(v.clone()));
    }
    if let Some(v) = &spec.memory_request {
        requests.insert("memory".to_owned(), k8s_openapi::apimachinery::pkg::api::resource::Quantity(v.clone()));
    }
    if let Some(v) = &spec.cpu_limit {
        limits.insert("cpu".to_owned(), k8s_openapi::apimachinery::pkg::api::resource::Quantity(v.clone()));
    }
    if let Some(v) = &spec.memory_limit {
        limits.insert("memory".to_owned(), k8s_openapi::apimachinery::pkg::api::resource::Quantity(v.clone()));
    }
    ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        claims: None,
    }
}

/// Polls readiness up to `deadline` (spec.md §4.4 step 6: "poll every 2 s, checking
/// `readyReplicas ≥ spec.replicas ∧ updatedReplicas ≥ spec.replicas ∧
/// availableReplicas ≥ spec.replicas`; fail fast on `ProgressDeadlineExceeded`").
pub async fn wait_for_readiness(
    client: &Client,
    namespace: &str,
    service_id: &str,
    desired_replicas: i32,
    deadline: std::time::Duration,
) -> Result<bool, OrchestratorError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let name = deployment(service_id);
    let started = tokio::time::Instant::now();
    loop {
        if let Some(current) = get_opt(&api, &name).await? {
            if progress_deadline_exceeded(&current) {
                return Ok(false);
            }
            if let Some(status) = &current.status {
                let ready = status.ready_replicas.unwrap_or(0) >= desired_replicas;
                let updated = status.updated_replicas.unwrap_or(0) >= desired_replicas;
                let available = status.available_replicas.unwrap_or(0) >= desired_replicas;
                if ready && updated && available {
                    return Ok(true);
                }
            }
        }
        if started.elapsed() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::{PortMapping, ScalingConfig, StorageConfig};

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            organization_id: "acme".into(),
            project_id: "blog".into(),
            service_id: "web-1".into(),
            deployment_id: None,
            service_type: queue::messages::ServiceType::Web,
            image: Some("acme/blog:latest".into()),
            pull_credentials: None,
            ports: vec![PortMapping { service_port: 80, container_port: 8080 }],
            env: vec![],
            resources: None,
            scaling: ScalingConfig { min_replicas: 1, max_replicas: 3, replicas: 2, target_cpu_utilization_percentage: None, auto_scaling_enabled: false },
            storage: StorageConfig { size: None, storage_class: None },
            probes: None,
            scale_to_zero_enabled: false,
            credentials: None,
            domains: vec!["blog.acme.test".into()],
            usernames: vec![],
        }
    }

    #[test]
    fn manifest_uses_effective_replicas_and_service_ports() {
        let manifest = build_manifest("acme-blog", &descriptor());
        assert_eq!(manifest.spec.as_ref().unwrap().replicas, Some(2));
        let container = &manifest.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
    }

    #[test]
    fn storage_attached_service_is_single_replica_recreate() {
        let mut d = descriptor();
        d.storage.size = Some("10Gi".into());
        d.scaling.replicas = 5;
        let manifest = build_manifest("acme-blog", &d);
        let spec = manifest.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.strategy.unwrap().type_.as_deref(), Some("Recreate"));
    }

    #[test]
    fn domain_labels_are_emitted_in_slot_order() {
        let manifest = build_manifest("acme-blog", &descriptor());
        let labels = manifest.metadata.labels.unwrap();
        assert_eq!(labels.get("domain-0"), Some(&"blog.acme.test".to_owned()));
    }
}
