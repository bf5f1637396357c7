//! Persistent volume claim lifecycle (spec.md §4.4 pipeline step 2: "ensure the
//! PersistentVolumeClaim: delete if `storage.size` is now unset; patch to grow if
//! increased (K8s forbids shrinking, so a decrease is ignored with a warning); create if
//! absent").

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::{Api, Client};
use tracing::warn;

use orchestrator::apply::{delete_if_exists, ensure, get_opt};
use orchestrator::client::OrchestratorError;
use orchestrator::labels::base_labels;
use orchestrator::names::pvc;

/// Outcome of reconciling the PVC, consumed by the deployment step to decide whether a
/// rolling-update trigger is needed after growth (spec.md §4.4 "MySQL-specific: growth
/// requires restarting the pod for the filesystem resize to take effect").
#[derive(Debug, PartialEq, Eq)]
pub enum StorageOutcome {
    Absent,
    Unchanged,
    Grown,
    Created,
}

pub async fn reconcile_storage(
    client: &Client,
    namespace: &str,
    organization_id: &str,
    project_id: &str,
    service_id: &str,
    storage_class: Option<&str>,
    requested_size: Option<&str>,
) -> Result<StorageOutcome, OrchestratorError> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let name = pvc(service_id);

    let Some(requested_size) = requested_size else {
        delete_if_exists(&api, &name).await?;
        return Ok(StorageOutcome::Absent);
    };

    let existing = get_opt(&api, &name).await?;
    let Some(existing) = existing else {
        let claim = build_claim(&name, organization_id, project_id, storage_class, requested_size);
        ensure(&api, &claim).await?;
        return Ok(StorageOutcome::Created);
    };

    let current_size = existing
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .cloned();

    match compare_sizes(current_size.as_ref(), requested_size) {
        SizeComparison::Equal => Ok(StorageOutcome::Unchanged),
        SizeComparison::Smaller => {
            warn!(service_id, requested_size, "ignoring PVC shrink request, volumes cannot shrink");
            Ok(StorageOutcome::Unchanged)
        }
        SizeComparison::Larger => {
            let mut claim = existing;
            if let Some(spec) = claim.spec.as_mut() {
                if let Some(resources) = spec.resources.as_mut() {
                    resources
                        .requests
                        .get_or_insert_with(BTreeMap::new)
                        .insert("storage".to_owned(), Quantity(requested_size.to_owned()));
                }
            }
            ensure(&api, &claim).await?;
            Ok(StorageOutcome::Grown)
        }
    }
}

enum SizeComparison {
    Equal,
    Smaller,
    Larger,
}

/// Parses Kubernetes binary-suffix quantities (`Gi`/`Mi`/`Ki`) well enough to compare a
/// requested size against the size already on the claim. Falls back to string equality
/// when either value doesn't parse, treating a mismatch conservatively as growth so a
/// malformed stored value doesn't permanently block resizing.
fn compare_sizes(current: Option<&Quantity>, requested: &str) -> SizeComparison {
    let Some(current) = current else { return SizeComparison::Larger };
    if current.0 == requested {
        return SizeComparison::Equal;
    }
    match (parse_bytes(&current.0), parse_bytes(requested)) {
        (Some(current_bytes), Some(requested_bytes)) if requested_bytes < current_bytes => SizeComparison::Smaller,
        (Some(current_bytes), Some(requested_bytes)) if requested_bytes == current_bytes => SizeComparison::Equal,
        _ => SizeComparison::Larger,
    }
}

fn parse_bytes(quantity: &str) -> Option<u64> {
    let (digits, multiplier) = if let Some(prefix) = quantity.strip_suffix("Gi") {
        (prefix, 1024u64.pow(3))
    } else if let Some(prefix) = quantity.strip_suffix("Mi") {
        (prefix, 1024u64.pow(2))
    } else if let Some(prefix) = quantity.strip_suffix("Ki") {
        (prefix, 1024)
    } else {
        (quantity, 1)
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

fn build_claim(name: &str, organization_id: &str, project_id: &str, storage_class: Option<&str>, size: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta { name: Some(name.to_owned()), labels: Some(base_labels(organization_id, project_id)), ..Default::default() },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
            storage_class_name: storage_class.map(str::to_owned),
            resources: Some(k8s_openapi::api::core::v1::ResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_owned(), Quantity(size.to_owned()))])),
                limits: None,
                claims: None,
            }),
            selector: None as Option<LabelSelector>,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bytes_handles_binary_suffixes() {
        assert_eq!(parse_bytes("10Gi"), Some(10 * 1024 * 1024 * 1024));
        assert_eq!(parse_bytes("512Mi"), Some(512 * 1024 * 1024));
        assert_eq!(parse_bytes("1Ki"), Some(1024));
    }

    #[test]
    fn compare_sizes_detects_shrink() {
        let current = Quantity("10Gi".to_owned());
        assert!(matches!(compare_sizes(Some(&current), "5Gi"), SizeComparison::Smaller));
    }

    #[test]
    fn compare_sizes_detects_growth() {
        let current = Quantity("5Gi".to_owned());
        assert!(matches!(compare_sizes(Some(&current), "10Gi"), SizeComparison::Larger));
    }

    #[test]
    fn compare_sizes_equal_strings_short_circuit() {
        let current = Quantity("10Gi".to_owned());
        assert!(matches!(compare_sizes(Some(&current), "10Gi"), SizeComparison::Equal));
    }
}
