//! Service object reconciliation (spec.md §4.4 pipeline step 4: "ensure the service
//! object; create or replace").

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use kube::api::ObjectMeta;
use kube::{Api, Client};
use queue::messages::ServiceDescriptor;

use orchestrator::apply::ensure;
use orchestrator::client::OrchestratorError;
use orchestrator::labels::SERVICE;
use orchestrator::names;

use crate::manifests::{profile_for, routing_labels};

pub async fn reconcile_service(client: &Client, namespace: &str, descriptor: &ServiceDescriptor) -> Result<(), OrchestratorError> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    let service = build_service(namespace, descriptor);
    ensure(&api, &service).await?;
    Ok(())
}

/// Builds the Service manifest, carrying the same routing label set
/// ([`routing_labels`]) as the Deployment: both gateways watch `Service` objects and
/// derive their routing tables from `domain-N`/`username-N`/`type`/
/// `scaleToZeroEnabled`/`service` (spec.md §3), so those labels must live here too, not
/// only on the Deployment.
fn build_service(namespace: &str, descriptor: &ServiceDescriptor) -> Service {
    let name = names::service(&descriptor.service_id);
    let profile = profile_for(descriptor.service_type);

    let ports: Vec<ServicePort> = profile
        .ports(descriptor)
        .into_iter()
        .enumerate()
        .map(|(i, mapping)| ServicePort {
            name: Some(format!("port-{i}")),
            port: mapping.service_port as i32,
            target_port: Some(k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int(mapping.container_port as i32)),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_owned()),
            labels: Some(routing_labels(descriptor)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(SERVICE.to_owned(), descriptor.service_id.clone())])),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::messages::{PortMapping, ScalingConfig, StorageConfig};

    #[test]
    fn service_port_name_is_stable_for_single_port_types() {
        let descriptor = ServiceDescriptor {
            organization_id: "acme".into(),
            project_id: "blog".into(),
            service_id: "db-1".into(),
            deployment_id: None,
            service_type: queue::messages::ServiceType::Mysql,
            image: None,
            pull_credentials: None,
            ports: vec![PortMapping { service_port: 3306, container_port: 3306 }],
            env: vec![],
            resources: None,
            scaling: ScalingConfig { min_replicas: 1, max_replicas: 1, replicas: 1, target_cpu_utilization_percentage: None, auto_scaling_enabled: false },
            storage: StorageConfig { size: Some("10Gi".into()), storage_class: None },
            probes: None,
            scale_to_zero_enabled: false,
            credentials: None,
            domains: vec![],
            usernames: vec!["alice".into()],
        };
        let profile = profile_for(descriptor.service_type);
        let ports = profile.ports(&descriptor);
        assert_eq!(ports[0].service_port, 3306);
    }

    #[test]
    fn built_service_carries_the_full_routing_label_set() {
        let descriptor = ServiceDescriptor {
            organization_id: "acme".into(),
            project_id: "blog".into(),
            service_id: "web-1".into(),
            deployment_id: None,
            service_type: queue::messages::ServiceType::Web,
            image: Some("acme/blog:latest".into()),
            pull_credentials: None,
            ports: vec![PortMapping { service_port: 80, container_port: 3000 }],
            env: vec![],
            resources: None,
            scaling: ScalingConfig { min_replicas: 1, max_replicas: 1, replicas: 1, target_cpu_utilization_percentage: None, auto_scaling_enabled: false },
            storage: StorageConfig { size: None, storage_class: None },
            probes: None,
            scale_to_zero_enabled: true,
            credentials: None,
            domains: vec!["blog.acme.test".into(), "www.blog.acme.test".into()],
            usernames: vec![],
        };
        let service = build_service("acme-blog", &descriptor);
        let labels = service.metadata.labels.unwrap();
        assert_eq!(labels.get("type"), Some(&"web".to_owned()));
        assert_eq!(labels.get("service"), Some(&"web-1".to_owned()));
        assert_eq!(labels.get("domain-0"), Some(&"blog.acme.test".to_owned()));
        assert_eq!(labels.get("domain-1"), Some(&"www.blog.acme.test".to_owned()));
        assert_eq!(labels.get("scaleToZeroEnabled"), Some(&"true".to_owned()));
    }

    #[test]
    fn built_database_service_carries_username_labels() {
        let descriptor = ServiceDescriptor {
            organization_id: "acme".into(),
            project_id: "blog".into(),
            service_id: "db-1".into(),
            deployment_id: None,
            service_type: queue::messages::ServiceType::Mysql,
            image: None,
            pull_credentials: None,
            ports: vec![PortMapping { service_port: 3306, container_port: 3306 }],
            env: vec![],
            resources: None,
            scaling: ScalingConfig { min_replicas: 1, max_replicas: 1, replicas: 1, target_cpu_utilization_percentage: None, auto_scaling_enabled: false },
            storage: StorageConfig { size: Some("10Gi".into()), storage_class: None },
            probes: None,
            scale_to_zero_enabled: false,
            credentials: None,
            domains: vec![],
            usernames: vec!["alice".into()],
        };
        let service = build_service("acme-blog", &descriptor);
        let labels = service.metadata.labels.unwrap();
        assert_eq!(labels.get("type"), Some(&"mysql".to_owned()));
        assert_eq!(labels.get("username-1"), Some(&"alice".to_owned()));
    }
}
