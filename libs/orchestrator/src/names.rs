//! Object naming conventions (spec.md §6 "Orchestrator object conventions").

pub fn deployment(service_id: &str) -> String {
    format!("{service_id}-deployment")
}

pub fn service(service_id: &str) -> String {
    format!("{service_id}-service")
}

pub fn hpa(service_id: &str) -> String {
    format!("{service_id}-hpa")
}

pub fn pvc(service_id: &str) -> String {
    format!("{service_id}-pvc")
}

pub fn pull_secret(service_id: &str) -> String {
    format!("{service_id}-container-registry-secret")
}

pub fn env_secret(service_id: &str) -> String {
    format!("{service_id}-env-secret")
}

pub fn engine_config_map(service_id: &str, engine: &str) -> String {
    format!("{service_id}-{engine}-config")
}

/// `cert-<dashed-domain>`, or `cert-wildcard-<dashed-base>` for the wildcard record.
pub fn certificate_secret(domain: &str) -> String {
    format!("cert-{}", utils::id::dashed(domain))
}

pub fn wildcard_certificate_secret(base_domain: &str) -> String {
    format!("cert-wildcard-{}", utils::id::dashed(base_domain))
}

pub const CERTIFICATE_NAMESPACE: &str = "system-apps";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_spec_conventions() {
        assert_eq!(deployment("svc-1"), "svc-1-deployment");
        assert_eq!(service("svc-1"), "svc-1-service");
        assert_eq!(hpa("svc-1"), "svc-1-hpa");
        assert_eq!(pvc("svc-1"), "svc-1-pvc");
        assert_eq!(pull_secret("svc-1"), "svc-1-container-registry-secret");
        assert_eq!(env_secret("svc-1"), "svc-1-env-secret");
        assert_eq!(engine_config_map("svc-1", "mysql"), "svc-1-mysql-config");
        assert_eq!(certificate_secret("example.test"), "cert-example-test");
        assert_eq!(wildcard_certificate_secret("example.app"), "cert-wildcard-example-app");
    }
}
