//! Web routing table (spec.md §3 "Routing entry (web)"): `domain -> serviceKey` plus
//! `serviceKey -> backend`. Populated from the orchestrator watcher (spec.md §9
//! "Watcher callbacks": always recompute from the latest observed object rather than
//! applying deltas) and read on every request.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service as KubeService;
use kube::ResourceExt;
use orchestrator::labels;
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub namespace: String,
    pub name: String,
    pub port: u16,
    pub scale_to_zero_enabled: bool,
    pub service_id: String,
}

#[derive(Default)]
struct Inner {
    by_domain: BTreeMap<String, String>,
    by_service_key: BTreeMap<String, Backend>,
    domains_by_service_key: BTreeMap<String, Vec<String>>,
}

/// Process-wide, read-write-locked (spec.md §5 "Ordering guarantees": lookups acquire
/// the read side, applying an add/delete event acquires the write side).
#[derive(Default)]
pub struct RoutingTable {
    inner: RwLock<Inner>,
}

fn service_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl RoutingTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lookup(&self, domain: &str) -> Option<Backend> {
        let guard = self.inner.read();
        let key = guard.by_domain.get(domain)?;
        guard.by_service_key.get(key).cloned()
    }

    /// Recomputes every domain entry owned by `svc` from its current labels, replacing
    /// whatever was there before (spec.md §9: recompute, don't apply deltas).
    pub fn upsert(&self, svc: &KubeService) {
        let Some(namespace) = svc.namespace() else { return };
        let name = svc.name_any();
        let key = service_key(&namespace, &name);
        let labels = svc.labels();

        let domains = labels::read_domains(labels);
        let Some(port) = port_for(svc) else {
            tracing::warn!(%namespace, %name, "web service has no port; skipping");
            return;
        };
        let service_id = labels.get("service").cloned().unwrap_or_else(|| name.clone());
        let scale_to_zero_enabled = labels::scale_to_zero_enabled(labels);

        let backend = Backend { namespace, name, port, scale_to_zero_enabled, service_id };

        let mut guard = self.inner.write();
        if let Some(old_domains) = guard.domains_by_service_key.remove(&key) {
            for domain in old_domains {
                guard.by_domain.remove(&domain);
            }
        }
        for domain in &domains {
            guard.by_domain.insert(domain.clone(), key.clone());
        }
        guard.domains_by_service_key.insert(key.clone(), domains);
        guard.by_service_key.insert(key, backend);
    }

    /// Removes every domain entry owned by `svc` atomically with respect to lookups
    /// (spec.md §8 invariant).
    pub fn remove(&self, svc: &KubeService) {
        let Some(namespace) = svc.namespace() else { return };
        let name = svc.name_any();
        let key = service_key(&namespace, &name);

        let mut guard = self.inner.write();
        if let Some(domains) = guard.domains_by_service_key.remove(&key) {
            for domain in domains {
                guard.by_domain.remove(&domain);
            }
        }
        guard.by_service_key.remove(&key);
    }

    pub fn len_domains(&self) -> usize {
        self.inner.read().by_domain.len()
    }

    /// Snapshot of every currently-routed domain, for the renewal sweep (spec.md §4.2).
    pub fn domains(&self) -> Vec<String> {
        self.inner.read().by_domain.keys().cloned().collect()
    }
}

fn port_for(svc: &KubeService) -> Option<u16> {
    let spec = svc.spec.as_ref()?;
    let port = spec.ports.as_ref()?.first()?;
    u16::try_from(port.port).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use kube::core::ObjectMeta;
    use std::collections::BTreeMap as Map;

    fn web_service(name: &str, domains: &[&str], port: i32) -> KubeService {
        let mut labels = Map::new();
        labels.insert("type".to_owned(), "web".to_owned());
        labels.insert("service".to_owned(), name.to_owned());
        for (i, domain) in domains.iter().enumerate() {
            labels.insert(format!("domain-{i}"), domain.to_string());
        }
        KubeService {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some("proj-1".to_owned()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort { port, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn upsert_creates_one_entry_per_domain_label() {
        let table = RoutingTable::new();
        table.upsert(&web_service("svc-1", &["a.example.test", "b.example.test"], 3000));
        assert_eq!(table.len_domains(), 2);
        assert_eq!(table.lookup("a.example.test").unwrap().port, 3000);
        assert_eq!(table.lookup("b.example.test").unwrap().port, 3000);
    }

    #[test]
    fn upsert_recomputes_domains_on_replay_instead_of_appending() {
        let table = RoutingTable::new();
        table.upsert(&web_service("svc-1", &["old.example.test"], 3000));
        table.upsert(&web_service("svc-1", &["new.example.test"], 3000));
        assert!(table.lookup("old.example.test").is_none());
        assert!(table.lookup("new.example.test").is_some());
        assert_eq!(table.len_domains(), 1);
    }

    #[test]
    fn remove_deletes_all_owned_domains_atomically() {
        let table = RoutingTable::new();
        let svc = web_service("svc-1", &["a.example.test", "b.example.test"], 3000);
        table.upsert(&svc);
        table.remove(&svc);
        assert_eq!(table.len_domains(), 0);
        assert!(table.lookup("a.example.test").is_none());
    }

    #[test]
    fn unknown_domain_is_a_lookup_miss() {
        let table = RoutingTable::new();
        assert!(table.lookup("nope.example.test").is_none());
    }

    #[test]
    fn domains_snapshots_every_routed_domain() {
        let table = RoutingTable::new();
        table.upsert(&web_service("svc-1", &["a.example.test", "b.example.test"], 3000));
        let mut domains = table.domains();
        domains.sort();
        assert_eq!(domains, vec!["a.example.test".to_owned(), "b.example.test".to_owned()]);
    }
}
