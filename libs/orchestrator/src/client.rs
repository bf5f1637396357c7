//! Builds a `kube::Client` from `kube_config_path` (empty ⇒ in-cluster config),
//! matching spec.md §6's `kube_config_path` option.

use kube::Client;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("failed to load kubeconfig: {0}")]
    Config(#[from] kube::config::KubeconfigError),
    #[error("failed to load in-cluster config: {0}")]
    InCluster(#[from] kube::config::InClusterError),
    #[error("kube client error: {0}")]
    Client(#[from] kube::Error),
}

impl utils::error::ReportableError for OrchestratorError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::Orchestrator
    }
}

/// `kube_config_path` empty or `None` ⇒ in-cluster credentials; otherwise the config
/// file at that path is used. This matches how every `web-gateway`/`db-gateway`/
/// `orchestration-worker` binary bootstraps its orchestrator client.
pub async fn build_client(kube_config_path: Option<&str>) -> Result<Client, OrchestratorError> {
    let config = match kube_config_path.filter(|p| !p.is_empty()) {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &kube::config::KubeConfigOptions::default()).await?
        }
        None => kube::Config::incluster()?,
    };
    Ok(Client::try_from(config)?)
}
