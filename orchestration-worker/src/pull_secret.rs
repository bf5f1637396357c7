//! Pull-credentials secret synthesis (spec.md §4.4 "Pull-credentials secret"): a cloud
//! registry gets a short-lived token fetched from the cloud registry API, a generic
//! registry just repackages the caller-supplied `username`/`password` as a
//! `.dockerconfigjson` entry. Host derivation for generic images follows the usual Docker
//! convention (bare names default to the public hub).

use std::collections::BTreeMap;

use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use queue::messages::{PullCredentials, RegistryKind};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum PullSecretError {
    #[error("cloud registry token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("cloud registry API url not configured")]
    MissingApiUrl,
}

impl utils::error::ReportableError for PullSecretError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::Upstream
    }
}

#[derive(Debug, Serialize)]
struct DockerConfigJson {
    auths: BTreeMap<String, DockerAuthEntry>,
}

#[derive(Debug, Serialize)]
struct DockerAuthEntry {
    auth: String,
}

#[derive(serde::Deserialize)]
struct CloudTokenResponse {
    token: String,
}

/// Derives the registry host a pull credential applies to. A cloud registry always
/// targets the platform's own registry host; a generic registry is derived from the
/// image reference, defaulting to Docker Hub for bare/library names.
pub fn registry_host(kind: RegistryKind, image: &str, cloud_registry_host: &str) -> String {
    match kind {
        RegistryKind::Cloud => cloud_registry_host.to_owned(),
        RegistryKind::Generic => generic_registry_host(image),
    }
}

fn generic_registry_host(image: &str) -> String {
    let repo = image.split('@').next().unwrap_or(image);
    let (first_segment, rest) = match repo.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (repo, None),
    };
    let looks_like_host = first_segment.contains('.') || first_segment.contains(':') || first_segment == "localhost";
    if rest.is_some() && looks_like_host {
        first_segment.to_owned()
    } else {
        "index.docker.io".to_owned()
    }
}

/// Builds the `.dockerconfigjson` Secret for a generic registry from the credentials the
/// deploy message carried directly.
pub fn generic_secret(namespace: &str, name: &str, image: &str, credentials: &PullCredentials) -> Secret {
    let host = generic_registry_host(image);
    build_secret(namespace, name, &host, &credentials.username, &credentials.password)
}

/// Fetches a fresh token from the cloud registry API and builds the Secret from it
/// (spec.md §4.4 "a short-lived token fetched from the cloud registry API").
pub async fn cloud_secret(
    http: &reqwest::Client,
    api_url: Option<&str>,
    namespace: &str,
    name: &str,
    cloud_registry_host: &str,
    organization_id: &str,
) -> Result<Secret, PullSecretError> {
    let api_url = api_url.ok_or(PullSecretError::MissingApiUrl)?;
    let response: CloudTokenResponse = http
        .post(format!("{api_url}/registry-tokens"))
        .json(&serde_json::json!({ "organizationId": organization_id }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(build_secret(namespace, name, cloud_registry_host, organization_id, &response.token))
}

fn build_secret(namespace: &str, name: &str, host: &str, username: &str, password: &str) -> Secret {
    let auth = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    let config = DockerConfigJson { auths: BTreeMap::from([(host.to_owned(), DockerAuthEntry { auth })]) };
    let payload = serde_json::to_vec(&config).expect("docker config json is always serializable");

    Secret {
        metadata: ObjectMeta { name: Some(name.to_owned()), namespace: Some(namespace.to_owned()), ..Default::default() },
        type_: Some("kubernetes.io/dockerconfigjson".to_owned()),
        data: Some(BTreeMap::from([(".dockerconfigjson".to_owned(), ByteString(payload))])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_image_defaults_to_docker_hub() {
        assert_eq!(generic_registry_host("redis:7"), "index.docker.io");
        assert_eq!(generic_registry_host("library/redis:7"), "index.docker.io");
    }

    #[test]
    fn namespaced_image_without_host_still_defaults_to_hub() {
        assert_eq!(generic_registry_host("myuser/myapp:latest"), "index.docker.io");
    }

    #[test]
    fn private_registry_host_is_detected_by_dot_or_port() {
        assert_eq!(generic_registry_host("registry.example.test/team/app:v1"), "registry.example.test");
        assert_eq!(generic_registry_host("localhost:5000/app:v1"), "localhost:5000");
    }

    #[test]
    fn generic_secret_encodes_username_password() {
        let creds = PullCredentials { registry_kind: RegistryKind::Generic, username: "u".into(), password: "p".into() };
        let secret = generic_secret("ns", "my-secret", "registry.example.test/team/app:v1", &creds);
        assert_eq!(secret.metadata.name.as_deref(), Some("my-secret"));
        let data = secret.data.unwrap();
        let raw = data.get(".dockerconfigjson").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&raw.0).unwrap();
        assert!(parsed["auths"]["registry.example.test"]["auth"].is_string());
    }
}
