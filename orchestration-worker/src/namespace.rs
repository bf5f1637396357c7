//! Project namespace provisioning (spec.md §4.4 deploy-service pipeline step 1: "ensure
//! the project's namespace exists").

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use kube::{Api, Client};

use crate::names::project_namespace;
use orchestrator::apply::ensure;
use orchestrator::client::OrchestratorError;
use orchestrator::labels::base_labels;

pub async fn ensure_namespace(client: &Client, organization_id: &str, project_id: &str) -> Result<(), OrchestratorError> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(project_namespace(organization_id, project_id)),
            labels: Some(base_labels(organization_id, project_id)),
            ..Default::default()
        },
        ..Default::default()
    };
    ensure(&api, &namespace).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_name_is_deterministic_from_ids() {
        assert_eq!(project_namespace("acme", "blog"), "acme-blog");
    }
}
