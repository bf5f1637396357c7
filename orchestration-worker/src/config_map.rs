//! Engine configuration config map (spec.md §4.4 "a config map is mounted at the
//! engine's conf directory with a generated configuration").

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{Api, Client};
use queue::messages::ServiceDescriptor;

use crate::manifests::{profile_for, ServiceProfile};
use orchestrator::apply::{delete_if_exists, ensure};
use orchestrator::client::OrchestratorError;
use orchestrator::labels::base_labels;
use orchestrator::names::engine_config_map;

/// Returns the config map name it ensured, or `None` if this service type doesn't
/// mount one (web/private).
pub async fn reconcile_config_map(client: &Client, namespace: &str, descriptor: &ServiceDescriptor) -> Result<Option<String>, OrchestratorError> {
    let profile = profile_for(descriptor.service_type);
    let Some((engine, _mount_path, data)) = profile.config_map(descriptor, &descriptor.service_id) else {
        return Ok(None);
    };
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let name = engine_config_map(&descriptor.service_id, &engine);
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_owned()),
            labels: Some(base_labels(&descriptor.organization_id, &descriptor.project_id)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    ensure(&api, &config_map).await?;
    Ok(Some(name))
}

/// Best-effort delete of every engine config map a service might have created, used by
/// `delete-service` (spec.md §4.4).
pub async fn delete_config_maps(client: &Client, namespace: &str, service_id: &str) -> Result<(), OrchestratorError> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    for engine in ["mysql", "postgres", "memory"] {
        delete_if_exists(&api, &engine_config_map(service_id, engine)).await?;
    }
    Ok(())
}
