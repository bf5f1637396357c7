//! Database routing table (spec.md §3 "Routing entry (database)"): `username ->
//! serviceKey` plus `serviceKey -> backend`, populated from the orchestrator watcher
//! the same way `web-gateway::routing` is. Username uniqueness is enforced by the
//! `username-1` label; if two services claim the same username the last-applied wins
//! and a warning is emitted (spec.md §3).

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
    pub usernames: Vec<String>,
}

#[derive(Default)]
struct Inner {
    by_username: BTreeMap<String, String>,
    by_service_key: BTreeMap<String, Backend>,
}

/// Process-wide, read-write-locked the same way `web-gateway::routing::RoutingTable`
/// is (spec.md §5 "Ordering guarantees").
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

    pub fn lookup(&self, username: &str) -> Option<Backend> {
        let guard = self.inner.read();
        let key = guard.by_username.get(username)?;
        guard.by_service_key.get(key).cloned()
    }

    /// Recomputes every username entry owned by `svc` from its current labels.
    pub fn upsert(&self, svc: &KubeService) {
        let Some(namespace) = svc.namespace() else { return };
        let name = svc.name_any();
        let key = service_key(&namespace, &name);
        let labels = svc.labels();

        let usernames = labels::read_usernames(labels);
        let Some(port) = port_for(svc) else {
            tracing::warn!(%namespace, %name, "database service has no port; skipping");
            return;
        };

        let backend = Backend { namespace, name, port, usernames: usernames.clone() };

        let mut guard = self.inner.write();
        if let Some(old) = guard.by_service_key.get(&key) {
            for username in &old.usernames {
                guard.by_username.remove(username);
            }
        }
        for username in &usernames {
            if let Some(existing_key) = guard.by_username.get(username) {
                if existing_key != &key {
                    tracing::warn!(%username, previous = %existing_key, new = %key, "username claimed by two services; last-applied wins");
                }
            }
            guard.by_username.insert(username.clone(), key.clone());
        }
        guard.by_service_key.insert(key, backend);
    }

    pub fn remove(&self, svc: &KubeService) {
        let Some(namespace) = svc.namespace() else { return };
        let name = svc.name_any();
        let key = service_key(&namespace, &name);

        let mut guard = self.inner.write();
        if let Some(backend) = guard.by_service_key.remove(&key) {
            for username in backend.usernames {
                guard.by_username.remove(&username);
            }
        }
    }

    pub fn len_usernames(&self) -> usize {
        self.inner.read().by_username.len()
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

    fn db_service(name: &str, usernames: &[&str], port: i32) -> KubeService {
        let mut labels = Map::new();
        labels.insert("type".to_owned(), "mysql".to_owned());
        for (i, user) in usernames.iter().enumerate() {
            labels.insert(format!("username-{}", i + 1), user.to_string());
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
    fn upsert_routes_username_to_service() {
        let table = RoutingTable::new();
        table.upsert(&db_service("mysql-1", &["alice"], 3306));
        let backend = table.lookup("alice").unwrap();
        assert_eq!(backend.name, "mysql-1");
        assert_eq!(backend.port, 3306);
    }

    #[test]
    fn unknown_username_is_a_lookup_miss() {
        let table = RoutingTable::new();
        table.upsert(&db_service("mysql-1", &["alice"], 3306));
        assert!(table.lookup("bob").is_none());
    }

    #[test]
    fn remove_deletes_the_username_mapping() {
        let table = RoutingTable::new();
        let svc = db_service("mysql-1", &["alice"], 3306);
        table.upsert(&svc);
        table.remove(&svc);
        assert!(table.lookup("alice").is_none());
        assert_eq!(table.len_usernames(), 0);
    }

    #[test]
    fn second_service_claiming_same_username_wins() {
        let table = RoutingTable::new();
        table.upsert(&db_service("mysql-1", &["alice"], 3306));
        table.upsert(&db_service("mysql-2", &["alice"], 3307));
        assert_eq!(table.lookup("alice").unwrap().name, "mysql-2");
    }

    #[test]
    fn upsert_recomputes_usernames_on_replay() {
        let table = RoutingTable::new();
        table.upsert(&db_service("mysql-1", &["old"], 3306));
        table.upsert(&db_service("mysql-1", &["new"], 3306));
        assert!(table.lookup("old").is_none());
        assert!(table.lookup("new").is_some());
    }
}
