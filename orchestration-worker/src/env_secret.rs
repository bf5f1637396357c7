//! Environment-variable secret (spec.md §4.4 "env-from-secret reference"; §4.4 per-type
//! rules "credentials are seeded into the env secret"). Every deployment's container
//! references this Secret via `envFrom` rather than inline `env` entries, so a later
//! credential rotation only needs a Secret update, not a manifest diff.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Api, Client};
use queue::messages::ServiceDescriptor;

use orchestrator::apply::ensure;
use orchestrator::client::OrchestratorError;
use orchestrator::labels::base_labels;
use orchestrator::names::env_secret;

pub async fn reconcile_env_secret(client: &Client, namespace: &str, descriptor: &ServiceDescriptor) -> Result<(), OrchestratorError> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let name = env_secret(&descriptor.service_id);

    let mut data = BTreeMap::new();
    for entry in &descriptor.env {
        data.insert(entry.name.clone(), ByteString(entry.value.clone().into_bytes()));
    }
    if let Some(credentials) = &descriptor.credentials {
        data.insert("DB_USERNAME".to_owned(), ByteString(credentials.username.clone().into_bytes()));
        data.insert("DB_PASSWORD".to_owned(), ByteString(credentials.password.clone().into_bytes()));
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_owned()),
            labels: Some(base_labels(&descriptor.organization_id, &descriptor.project_id)),
            ..Default::default()
        },
        type_: Some("Opaque".to_owned()),
        data: Some(data),
        ..Default::default()
    };
    ensure(&api, &secret).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::{DatabaseCredentials, EnvVar, PortMapping, ScalingConfig, StorageConfig};

    #[test]
    fn secret_name_matches_convention() {
        assert_eq!(env_secret("svc-9"), "svc-9-env-secret");
    }

    #[test]
    fn descriptor_fields_round_trip_into_secret_data() {
        let descriptor = ServiceDescriptor {
            organization_id: "acme".into(),
            project_id: "blog".into(),
            service_id: "db-1".into(),
            deployment_id: None,
            service_type: queue::messages::ServiceType::Mysql,
            image: None,
            pull_credentials: None,
            ports: vec![PortMapping { service_port: 3306, container_port: 3306 }],
            env: vec![EnvVar { name: "FOO".into(), value: "bar".into() }],
            resources: None,
            scaling: ScalingConfig { min_replicas: 1, max_replicas: 1, replicas: 1, target_cpu_utilization_percentage: None, auto_scaling_enabled: false },
            storage: StorageConfig { size: Some("10Gi".into()), storage_class: None },
            probes: None,
            scale_to_zero_enabled: false,
            credentials: Some(DatabaseCredentials { username: "dbuser".into(), password: "secret".into() }),
            domains: vec![],
            usernames: vec!["dbuser".into()],
        };
        let mut data = BTreeMap::new();
        for entry in &descriptor.env {
            data.insert(entry.name.clone(), entry.value.clone());
        }
        assert_eq!(data.get("FOO"), Some(&"bar".to_owned()));
    }
}
