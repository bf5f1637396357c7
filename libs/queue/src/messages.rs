//! Data model for spec.md §3 "Service descriptor" and §4.4's queue message kinds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Web,
    Private,
    Mysql,
    Postgresql,
    Memory,
}

impl ServiceType {
    pub fn is_database(&self) -> bool {
        matches!(self, ServiceType::Mysql | ServiceType::Postgresql | ServiceType::Memory)
    }

    pub fn engine_name(&self) -> Option<&'static str> {
        match self {
            ServiceType::Mysql => Some("mysql"),
            ServiceType::Postgresql => Some("postgres"),
            ServiceType::Memory => Some("memory"),
            ServiceType::Web | ServiceType::Private => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegistryKind {
    Cloud,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullCredentials {
    pub registry_kind: RegistryKind,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub service_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub replicas: u32,
    pub target_cpu_utilization_percentage: Option<u32>,
    pub auto_scaling_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    pub size: Option<String>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProbes {
    pub liveness_path: Option<String>,
    pub readiness_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub organization_id: String,
    pub project_id: String,
    pub service_id: String,
    pub deployment_id: Option<String>,
    pub service_type: ServiceType,
    pub image: Option<String>,
    pub pull_credentials: Option<PullCredentials>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub resources: Option<ResourceSpec>,
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub probes: Option<HttpProbes>,
    #[serde(default)]
    pub scale_to_zero_enabled: bool,
    #[serde(default)]
    pub credentials: Option<DatabaseCredentials>,
    /// Web-type only: ordered list of domains to claim (`domain-0`, `domain-1`, ...).
    #[serde(default)]
    pub domains: Vec<String>,
    /// Database-type only: usernames to route by (`username-1`, ...).
    #[serde(default)]
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("minReplicas must be >= 1, got {0}")]
    MinReplicasTooLow(u32),
    #[error("maxReplicas ({max}) must be >= minReplicas ({min})")]
    MaxBelowMin { min: u32, max: u32 },
    #[error("port {0} out of range [1, 65535]")]
    PortOutOfRange(u32),
}

impl ServiceDescriptor {
    /// Invariants from spec.md §3: `minReplicas >= 1`, `maxReplicas >= minReplicas`,
    /// ports in `[1, 65535]`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scaling.min_replicas < 1 {
            return Err(ValidationError::MinReplicasTooLow(self.scaling.min_replicas));
        }
        if self.scaling.max_replicas < self.scaling.min_replicas {
            return Err(ValidationError::MaxBelowMin { min: self.scaling.min_replicas, max: self.scaling.max_replicas });
        }
        for port in &self.ports {
            if port.service_port == 0 || port.container_port == 0 {
                return Err(ValidationError::PortOutOfRange(port.service_port.min(port.container_port) as u32));
            }
        }
        Ok(())
    }

    /// If storage is attached, effective replicas is forced to 1 regardless of scaling
    /// config (spec.md §3 invariant, restated for Deployment/HPA/private-with-storage
    /// call sites in spec.md §4.4).
    pub fn effective_replicas(&self) -> u32 {
        if self.has_storage() {
            1
        } else {
            self.scaling.replicas
        }
    }

    pub fn has_storage(&self) -> bool {
        self.storage.size.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKey {
    pub organization_id: String,
    pub project_id: String,
    pub service_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Replicas {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub enum IntentMessage {
    DeployService { service: ServiceDescriptor },
    DeleteService { key: ServiceKey },
    DeleteProject { organization_id: String, project_id: String },
    DeleteOrganization { organization_id: String },
    ControlService { key: ServiceKey, replicas: Replicas },
}

impl IntentMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            IntentMessage::DeployService { .. } => "deploy-service",
            IntentMessage::DeleteService { .. } => "delete-service",
            IntentMessage::DeleteProject { .. } => "delete-project",
            IntentMessage::DeleteOrganization { .. } => "delete-organization",
            IntentMessage::ControlService { .. } => "control-service",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor {
            organization_id: "org".into(),
            project_id: "proj".into(),
            service_id: "svc".into(),
            deployment_id: None,
            service_type: ServiceType::Web,
            image: Some("example/web:latest".into()),
            pull_credentials: None,
            ports: vec![PortMapping { service_port: 1, container_port: 65535 }],
            env: vec![],
            resources: None,
            scaling: ScalingConfig { min_replicas: 1, max_replicas: 1, replicas: 1, target_cpu_utilization_percentage: None, auto_scaling_enabled: false },
            storage: StorageConfig { size: None, storage_class: None },
            probes: None,
            scale_to_zero_enabled: false,
            credentials: None,
            domains: vec![],
            usernames: vec![],
        }
    }

    #[test]
    fn boundary_ports_1_and_65535_are_accepted() {
        assert!(descriptor().validate().is_ok());
    }

    #[test]
    fn min_replicas_zero_is_rejected() {
        let mut d = descriptor();
        d.scaling.min_replicas = 0;
        assert_eq!(d.validate(), Err(ValidationError::MinReplicasTooLow(0)));
    }

    #[test]
    fn max_below_min_is_rejected() {
        let mut d = descriptor();
        d.scaling.min_replicas = 2;
        d.scaling.max_replicas = 1;
        assert_eq!(d.validate(), Err(ValidationError::MaxBelowMin { min: 2, max: 1 }));
    }

    #[test]
    fn min_equals_max_equals_one_with_autoscaling_is_valid() {
        let mut d = descriptor();
        d.scaling.min_replicas = 1;
        d.scaling.max_replicas = 1;
        d.scaling.auto_scaling_enabled = true;
        d.scaling.target_cpu_utilization_percentage = Some(80);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn storage_forces_single_replica() {
        let mut d = descriptor();
        d.scaling.replicas = 5;
        d.storage.size = Some("10Gi".into());
        assert_eq!(d.effective_replicas(), 1);
    }

    #[test]
    fn deploy_service_round_trips_through_json_with_type_tag() {
        let msg = IntentMessage::DeployService { service: descriptor() };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"deploy-service\""));
        let decoded: IntentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.kind(), "deploy-service");
    }

    #[test]
    fn unknown_type_tag_fails_to_decode() {
        let json = r#"{"type":"reticulate-splines"}"#;
        assert!(serde_json::from_str::<IntentMessage>(json).is_err());
    }
}
