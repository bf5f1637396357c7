//! Horizontal autoscaler reconciliation (spec.md §4.4 pipeline step 5: "create/replace
//! iff `autoScalingEnabled ∧ maxReplicas ∧ targetCPUUtilizationPercentage`; otherwise
//! delete any existing autoscaler").

use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget,
    ResourceMetricSource,
};
use kube::api::ObjectMeta;
use kube::{Api, Client};
use queue::messages::ServiceDescriptor;

use orchestrator::apply::{delete_if_exists, ensure};
use orchestrator::client::OrchestratorError;
use orchestrator::labels::base_labels;
use orchestrator::names::{deployment, hpa};

pub async fn reconcile_autoscaler(client: &Client, namespace: &str, descriptor: &ServiceDescriptor) -> Result<(), OrchestratorError> {
    let api: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), namespace);
    let name = hpa(&descriptor.service_id);

    let wants_autoscaling = descriptor.scaling.auto_scaling_enabled
        && descriptor.scaling.max_replicas > 0
        && descriptor.scaling.target_cpu_utilization_percentage.is_some();

    if !wants_autoscaling {
        delete_if_exists(&api, &name).await?;
        return Ok(());
    }

    let target_cpu = descriptor.scaling.target_cpu_utilization_percentage.unwrap();
    let autoscaler = HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_owned()),
            labels: Some(base_labels(&descriptor.organization_id, &descriptor.project_id)),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_owned()),
                kind: "Deployment".to_owned(),
                name: deployment(&descriptor.service_id),
            },
            min_replicas: Some(descriptor.scaling.min_replicas as i32),
            max_replicas: descriptor.scaling.max_replicas as i32,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".to_owned(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".to_owned(),
                    target: MetricTarget { type_: "Utilization".to_owned(), average_utilization: Some(target_cpu as i32), ..Default::default() },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    ensure(&api, &autoscaler).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hpa_name_follows_convention() {
        assert_eq!(hpa("svc-1"), "svc-1-hpa");
    }
}
