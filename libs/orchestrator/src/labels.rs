//! Label/annotation vocabulary from spec.md §2 and §6.

use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "managedBy";
pub const ORGANIZATION: &str = "organization";
pub const PROJECT: &str = "project";
pub const SERVICE: &str = "service";
pub const TYPE: &str = "type";
pub const SCALE_TO_ZERO_ENABLED: &str = "scaleToZeroEnabled";
pub const RESTARTED_AT_ANNOTATION: &str = "portway.dev/restartedAt";

pub const CERTIFICATE_TYPE_LABEL_VALUE: &str = "certificate";

/// `domain-0`, `domain-1`, ... label key for slot `n`.
pub fn domain_label(n: usize) -> String {
    format!("domain-{n}")
}

/// `username-1` label key for slot `n` (1-indexed per spec.md §3/§6).
pub fn username_label(n: usize) -> String {
    format!("username-{n}")
}

/// Reads every `domain-<N>` label present, in ascending `N` order, ignoring gaps.
pub fn read_domains(labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut domains: Vec<(usize, String)> = labels
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("domain-").and_then(|n| n.parse::<usize>().ok()).map(|n| (n, v.clone())))
        .collect();
    domains.sort_by_key(|(n, _)| *n);
    domains.into_iter().map(|(_, v)| v).collect()
}

/// Reads every `username-<N>` label present, in ascending `N` order.
pub fn read_usernames(labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut usernames: Vec<(usize, String)> = labels
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("username-").and_then(|n| n.parse::<usize>().ok()).map(|n| (n, v.clone())))
        .collect();
    usernames.sort_by_key(|(n, _)| *n);
    usernames.into_iter().map(|(_, v)| v).collect()
}

pub fn scale_to_zero_enabled(labels: &BTreeMap<String, String>) -> bool {
    labels.get(SCALE_TO_ZERO_ENABLED).map(|v| v == "true").unwrap_or(false)
}

/// Standard label set for every namespace/object this platform creates
/// (spec.md §6 "Orchestrator object conventions").
pub fn base_labels(organization: &str, project: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY.to_owned(), "portway".to_owned()),
        (ORGANIZATION.to_owned(), organization.to_owned()),
        (PROJECT.to_owned(), project.to_owned()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_domains_orders_by_slot_and_skips_unrelated_labels() {
        let labels = BTreeMap::from([
            ("domain-1".to_owned(), "b.example.test".to_owned()),
            ("domain-0".to_owned(), "a.example.test".to_owned()),
            ("type".to_owned(), "web".to_owned()),
        ]);
        assert_eq!(read_domains(&labels), vec!["a.example.test", "b.example.test"]);
    }

    #[test]
    fn read_usernames_is_one_indexed_per_spec() {
        let labels = BTreeMap::from([("username-1".to_owned(), "alice".to_owned())]);
        assert_eq!(read_usernames(&labels), vec!["alice"]);
    }

    #[test]
    fn scale_to_zero_defaults_to_false() {
        let labels = BTreeMap::new();
        assert!(!scale_to_zero_enabled(&labels));
    }
}
