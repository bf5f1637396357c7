//! Idempotent create-or-update against the orchestrator (spec.md §9 "every worker
//! handler must be idempotent: create-or-update, delete-if-exists").

use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::client::OrchestratorError;

const FIELD_MANAGER: &str = "portway-orchestration-worker";

/// Server-side apply of `object`: creates it if absent, otherwise merges the fields this
/// process owns. Using SSA instead of a read-then-create/patch branch means concurrent
/// `deploy-service` replays from two worker pods converge to the same object rather than
/// racing on a read.
pub async fn ensure<K>(api: &Api<K>, object: &K) -> Result<K, OrchestratorError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Serialize,
    K::DynamicType: Default,
{
    let name = object.name_any();
    let patch = Patch::Apply(object);
    let params = PatchParams::apply(FIELD_MANAGER).force();
    Ok(api.patch(&name, &params, &patch).await?)
}

/// Deletes `name` if present; a pre-existing absence is success, matching spec.md's
/// delete-if-exists idempotence requirement.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str) -> Result<(), OrchestratorError>
where
    K: Resource + Clone + Debug + DeserializeOwned,
    K::DynamicType: Default,
{
    match api.delete(name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, OrchestratorError>
where
    K: Resource + Clone + Debug + DeserializeOwned,
    K::DynamicType: Default,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}
