//! A thin layer over `kube`/`k8s-openapi` shared by both gateways (which only watch) and
//! the orchestration worker (which watches, applies, and deletes). Keeps the object
//! naming/labeling conventions (spec.md §6) in one place so the three binaries can't
//! drift on them.

pub mod apply;
pub mod client;
pub mod labels;
pub mod names;
pub mod watch;

pub use client::{build_client, OrchestratorError};
