//! The `MessageHandler` impl dispatching each `IntentMessage` variant to its pipeline
//! (spec.md §4.4).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use queue::consumer::{HandleError, MessageHandler};
use queue::messages::{IntentMessage, Replicas, ServiceDescriptor, ServiceKey, ServiceType};
use tracing::{info, warn};

use crate::{autoscaler, config_map, deployment, env_secret, metrics::METRICS, names::project_namespace, namespace, pull_secret, service, status::StatusReporter, storage};
use orchestrator::apply::delete_if_exists;
use orchestrator::labels::{ORGANIZATION, PROJECT};
use orchestrator::names;

const FIELD_MANAGER: &str = "portway-orchestration-worker";

pub struct Handlers {
    pub client: Client,
    pub http: reqwest::Client,
    pub cloud_registry_api_url: Option<String>,
    pub cloud_registry_host: String,
    pub readiness_timeout: Duration,
    pub reporter: Box<dyn StatusReporter + Send + Sync>,
}

#[async_trait]
impl MessageHandler for Handlers {
    async fn handle(&self, message: IntentMessage) -> Result<(), HandleError> {
        let kind = message.kind();
        let started = Instant::now();
        let result = match message {
            IntentMessage::DeployService { service } => self.deploy_service(service).await,
            IntentMessage::DeleteService { key } => self.delete_service(key).await,
            IntentMessage::DeleteProject { organization_id, project_id } => self.delete_project(&organization_id, &project_id).await,
            IntentMessage::DeleteOrganization { organization_id } => self.delete_organization(&organization_id).await,
            IntentMessage::ControlService { key, replicas } => self.control_service(key, replicas).await,
        };
        let outcome = if result.is_ok() { "success" } else { "failure" };
        METRICS.record(kind, outcome, started.elapsed().as_secs_f64());
        result.map_err(|e| HandleError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] orchestrator::client::OrchestratorError),
    #[error("validation error: {0}")]
    Validation(#[from] queue::messages::ValidationError),
    #[error("pull secret error: {0}")]
    PullSecret(#[from] pull_secret::PullSecretError),
}

impl Handlers {
    async fn deploy_service(&self, descriptor: ServiceDescriptor) -> Result<(), HandlerError> {
        descriptor.validate()?;
        let ns = project_namespace(&descriptor.organization_id, &descriptor.project_id);
        let deployment_name = names::deployment(&descriptor.service_id);

        // 1. namespace
        namespace::ensure_namespace(&self.client, &descriptor.organization_id, &descriptor.project_id).await?;

        // 2. storage
        let outcome = storage::reconcile_storage(
            &self.client,
            &ns,
            &descriptor.organization_id,
            &descriptor.project_id,
            &descriptor.service_id,
            descriptor.storage.storage_class.as_deref(),
            descriptor.storage.size.as_deref(),
        )
        .await?;

        // ancillary objects the deployment references
        env_secret::reconcile_env_secret(&self.client, &ns, &descriptor).await?;
        config_map::reconcile_config_map(&self.client, &ns, &descriptor).await?;
        if let Some(credentials) = &descriptor.pull_credentials {
            self.reconcile_pull_secret(&ns, &descriptor, credentials).await?;
        }

        // 3. deployment
        deployment::reconcile_deployment(&self.client, &ns, &descriptor).await?;
        if outcome == storage::StorageOutcome::Grown && descriptor.service_type == ServiceType::Mysql {
            info!(service_id = %descriptor.service_id, "triggering rollout after mysql storage growth");
            self.force_rollout(&ns, &deployment_name).await?;
        }

        // 4. service
        service::reconcile_service(&self.client, &ns, &descriptor).await?;

        // 5. autoscaler
        autoscaler::reconcile_autoscaler(&self.client, &ns, &descriptor).await?;

        // 6. readiness
        let ready = deployment::wait_for_readiness(
            &self.client,
            &ns,
            &descriptor.service_id,
            descriptor.effective_replicas() as i32,
            self.readiness_timeout,
        )
        .await?;

        // 7. status
        if ready {
            if let Err(e) = self.reporter.set_active(&ns, &deployment_name, true).await {
                warn!(service_id = %descriptor.service_id, error = %e, "failed to record active status");
            }
            if let Err(e) = self.reporter.clear_crashloop(&ns, &deployment_name).await {
                warn!(service_id = %descriptor.service_id, error = %e, "failed to clear crashloop flag");
            }
            info!(service_id = %descriptor.service_id, "deployed");
        } else {
            if let Err(e) = self.reporter.set_active(&ns, &deployment_name, false).await {
                warn!(service_id = %descriptor.service_id, error = %e, "failed to record inactive status");
            }
            warn!(service_id = %descriptor.service_id, "deployment did not become ready within deadline");
        }
        Ok(())
    }

    async fn reconcile_pull_secret(
        &self,
        ns: &str,
        descriptor: &ServiceDescriptor,
        credentials: &queue::messages::PullCredentials,
    ) -> Result<(), HandlerError> {
        use k8s_openapi::api::core::v1::Secret;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        let name = names::pull_secret(&descriptor.service_id);
        let secret = match credentials.registry_kind {
            queue::messages::RegistryKind::Generic => {
                pull_secret::generic_secret(ns, &name, descriptor.image.as_deref().unwrap_or_default(), credentials)
            }
            queue::messages::RegistryKind::Cloud => {
                pull_secret::cloud_secret(
                    &self.http,
                    self.cloud_registry_api_url.as_deref(),
                    ns,
                    &name,
                    &self.cloud_registry_host,
                    &descriptor.organization_id,
                )
                .await?
            }
        };
        orchestrator::apply::ensure(&api, &secret).await?;
        Ok(())
    }

    async fn force_rollout(&self, ns: &str, deployment_name: &str) -> Result<(), HandlerError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), ns);
        let now = chrono::Utc::now().to_rfc3339();
        let mut annotations = serde_json::Map::new();
        annotations.insert(orchestrator::labels::RESTARTED_AT_ANNOTATION.to_owned(), serde_json::Value::String(now));
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": serde_json::Value::Object(annotations) } } }
        });
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(deployment_name, &params, &Patch::Apply(&patch)).await.map_err(orchestrator::client::OrchestratorError::from)?;
        Ok(())
    }

    /// Deletes, each best-effort and independent (spec.md §4.4 "errors logged, not
    /// fatal"): deployment, service, autoscaler, claim, volume, pull secret, env secret,
    /// engine config map(s).
    async fn delete_service(&self, key: ServiceKey) -> Result<(), HandlerError> {
        let ns = project_namespace(&key.organization_id, &key.project_id);

        let deployment_api: Api<Deployment> = Api::namespaced(self.client.clone(), &ns);
        let service_api: Api<Service> = Api::namespaced(self.client.clone(), &ns);
        let hpa_api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), &ns);
        let pvc_api: Api<k8s_openapi::api::core::v1::PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &ns);
        let secret_api: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(self.client.clone(), &ns);

        best_effort("deployment", delete_if_exists(&deployment_api, &names::deployment(&key.service_id)).await);
        best_effort("service", delete_if_exists(&service_api, &names::service(&key.service_id)).await);
        best_effort("autoscaler", delete_if_exists(&hpa_api, &names::hpa(&key.service_id)).await);
        best_effort("claim", delete_if_exists(&pvc_api, &names::pvc(&key.service_id)).await);
        best_effort("pull-secret", delete_if_exists(&secret_api, &names::pull_secret(&key.service_id)).await);
        best_effort("env-secret", delete_if_exists(&secret_api, &names::env_secret(&key.service_id)).await);
        best_effort("config-maps", config_map::delete_config_maps(&self.client, &ns, &key.service_id).await);
        Ok(())
    }

    /// Deletes the project's namespace (cascades to all children). If the namespace is
    /// already absent, falls back to per-service deletion by the `project` label.
    async fn delete_project(&self, organization_id: &str, project_id: &str) -> Result<(), HandlerError> {
        let ns = project_namespace(organization_id, project_id);
        let namespace_api: Api<Namespace> = Api::all(self.client.clone());
        match orchestrator::apply::get_opt(&namespace_api, &ns).await? {
            Some(_) => {
                delete_if_exists(&namespace_api, &ns).await?;
            }
            None => {
                warn!(organization_id, project_id, "namespace absent, sweeping by project label");
                self.sweep_by_label(PROJECT, project_id).await?;
            }
        }
        Ok(())
    }

    /// Deletes every namespace bearing `organization=<id>`; also sweeps autoscalers by
    /// label as a safety net (spec.md §4.4).
    async fn delete_organization(&self, organization_id: &str) -> Result<(), HandlerError> {
        let namespace_api: Api<Namespace> = Api::all(self.client.clone());
        let selector = format!("{ORGANIZATION}={organization_id}");
        let list = namespace_api.list(&ListParams::default().labels(&selector)).await.map_err(orchestrator::client::OrchestratorError::from)?;
        for ns in list.items {
            if let Some(name) = ns.metadata.name {
                best_effort("namespace", delete_if_exists(&namespace_api, &name).await);
            }
        }
        self.sweep_by_label(ORGANIZATION, organization_id).await?;
        Ok(())
    }

    async fn sweep_by_label(&self, label: &str, value: &str) -> Result<(), HandlerError> {
        let hpa_api: Api<HorizontalPodAutoscaler> = Api::all(self.client.clone());
        let selector = format!("{label}={value}");
        let list = hpa_api.list(&ListParams::default().labels(&selector)).await.map_err(orchestrator::client::OrchestratorError::from)?;
        for hpa in list.items {
            if let (Some(name), Some(ns)) = (hpa.metadata.name, hpa.metadata.namespace) {
                let scoped: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), &ns);
                best_effort("autoscaler-sweep", delete_if_exists(&scoped, &name).await);
            }
        }

        let deployment_api: Api<Deployment> = Api::all(self.client.clone());
        let list = deployment_api.list(&ListParams::default().labels(&selector)).await.map_err(orchestrator::client::OrchestratorError::from)?;
        for deployment in list.items {
            if let (Some(name), Some(ns)) = (deployment.metadata.name, deployment.metadata.namespace) {
                let scoped: Api<Deployment> = Api::namespaced(self.client.clone(), &ns);
                best_effort("deployment-sweep", delete_if_exists(&scoped, &name).await);
            }
        }
        Ok(())
    }

    /// Patches `spec.replicas` to 1 (up) or 0 (down); only web-type services mirror into
    /// the KV store (spec.md §4.4 "Only web-type services mirror into KV store").
    async fn control_service(&self, key: ServiceKey, replicas: Replicas) -> Result<(), HandlerError> {
        let ns = project_namespace(&key.organization_id, &key.project_id);
        let deployment_name = names::deployment(&key.service_id);
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &ns);
        let target = match replicas {
            Replicas::Up => 1,
            Replicas::Down => 0,
        };
        let patch = serde_json::json!({ "spec": { "replicas": target } });
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&deployment_name, &params, &Patch::Apply(&patch)).await.map_err(orchestrator::client::OrchestratorError::from)?;

        let Some(existing) = orchestrator::apply::get_opt(&api, &deployment_name).await? else { return Ok(()) };
        let is_web = existing.metadata.labels.as_ref().and_then(|l| l.get(orchestrator::labels::TYPE)).map(String::as_str) == Some("web");
        if is_web {
            if let Err(e) = self.reporter.set_active(&ns, &deployment_name, matches!(replicas, Replicas::Up)).await {
                warn!(service_id = %key.service_id, error = %e, "failed to mirror control-service status into kv");
            }
        }
        Ok(())
    }
}

fn best_effort<E: std::fmt::Display>(what: &str, result: Result<(), E>) {
    if let Err(e) = result {
        warn!(what, error = %e, "best-effort delete failed");
    }
}
