//! Typed identity newtypes for the service descriptor (spec.md §3).
//!
//! Grounded on the teacher's `utils::id::NodeId` pattern: a thin `String` wrapper with
//! `Display`/`serde` so call sites can't accidentally swap an organization id for a
//! project id at a type-checked boundary, while still being cheap to clone and log.

use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(OrganizationId);
string_id!(ProjectId);
string_id!(ServiceId);
string_id!(DeploymentId);

/// A label-safe, filesystem-safe, and Kubernetes-object-name-safe rendering of a domain,
/// used for certificate Secret names (`cert-<dashed-domain>`, spec.md §6).
pub fn dashed(domain: &str) -> String {
    domain.chars().map(|c| if c == '.' { '-' } else { c }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashed_replaces_dots_only() {
        assert_eq!(dashed("api.example.app"), "api-example-app");
        assert_eq!(dashed("example"), "example");
    }

    #[test]
    fn service_id_displays_as_inner_string() {
        let id: ServiceId = "svc-123".into();
        assert_eq!(id.to_string(), "svc-123");
        assert_eq!(id.as_str(), "svc-123");
    }
}
