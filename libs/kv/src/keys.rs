//! Exact key formats from spec.md §6 "KV store keys". Centralized so the gateways and
//! the worker never drift on formatting.

/// `service:access:<namespace>:<deployment>` → Unix seconds.
pub fn access(namespace: &str, deployment: &str) -> String {
    format!("service:access:{namespace}:{deployment}")
}

/// `deployment:status:<namespace>:<deployment>` → `"1"|"0"`, TTL 24h.
pub fn deployment_status(namespace: &str, deployment: &str) -> String {
    format!("deployment:status:{namespace}:{deployment}")
}

/// `deployment:crashloop:<namespace>:<deployment>` → `"1"`, TTL 24h.
pub fn deployment_crashloop(namespace: &str, deployment: &str) -> String {
    format!("deployment:crashloop:{namespace}:{deployment}")
}

/// `cert:<domain>:cert` → PEM, TTL 85 days.
pub fn cert_chain(domain: &str) -> String {
    format!("cert:{domain}:cert")
}

/// `cert:<domain>:key` → PEM, TTL 85 days.
pub fn cert_key(domain: &str) -> String {
    format!("cert:{domain}:key")
}

/// `cert:<domain>:ratelimit` → sentinel, TTL = parsed cooldown.
pub fn cert_ratelimit(domain: &str) -> String {
    format!("cert:{domain}:ratelimit")
}

/// `acme:account` → serialized ACME account credentials (SPEC_FULL.md §4.2 addition).
pub const ACME_ACCOUNT: &str = "acme:account";

pub const STATUS_ACTIVE: &str = "1";
pub const STATUS_INACTIVE: &str = "0";

pub const TTL_DEPLOYMENT_STATUS: std::time::Duration = std::time::Duration::from_secs(24 * 3600);
pub const TTL_CRASHLOOP: std::time::Duration = std::time::Duration::from_secs(24 * 3600);
pub const TTL_CERT: std::time::Duration = std::time::Duration::from_secs(85 * 24 * 3600);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_match_spec() {
        assert_eq!(access("ns-1", "svc-1-deployment"), "service:access:ns-1:svc-1-deployment");
        assert_eq!(deployment_status("ns-1", "svc-1-deployment"), "deployment:status:ns-1:svc-1-deployment");
        assert_eq!(deployment_crashloop("ns-1", "svc-1-deployment"), "deployment:crashloop:ns-1:svc-1-deployment");
        assert_eq!(cert_chain("example.test"), "cert:example.test:cert");
        assert_eq!(cert_key("example.test"), "cert:example.test:key");
        assert_eq!(cert_ratelimit("example.test"), "cert:example.test:ratelimit");
    }
}
