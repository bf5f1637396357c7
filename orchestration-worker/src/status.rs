//! `active?`/`crashloop?` reporting (spec.md §4.4 step 7, §4.6), on the same KV keys the
//! web gateway's idle scaler and wake-up path read (SPEC_FULL.md §4.4 "`StatusReporter`
//! trait").

use async_trait::async_trait;
use kv::{keys, KvError, Store};

#[async_trait]
pub trait StatusReporter {
    async fn set_active(&self, namespace: &str, deployment: &str, active: bool) -> Result<(), KvError>;
    async fn clear_crashloop(&self, namespace: &str, deployment: &str) -> Result<(), KvError>;
    async fn set_crashloop(&self, namespace: &str, deployment: &str) -> Result<(), KvError>;
}

pub struct KvStatusReporter {
    store: Store,
}

impl KvStatusReporter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StatusReporter for KvStatusReporter {
    async fn set_active(&self, namespace: &str, deployment: &str, active: bool) -> Result<(), KvError> {
        let value = if active { keys::STATUS_ACTIVE } else { keys::STATUS_INACTIVE };
        self.store.set_ex(&keys::deployment_status(namespace, deployment), value, keys::TTL_DEPLOYMENT_STATUS).await
    }

    async fn clear_crashloop(&self, namespace: &str, deployment: &str) -> Result<(), KvError> {
        self.store.del(&keys::deployment_crashloop(namespace, deployment)).await
    }

    async fn set_crashloop(&self, namespace: &str, deployment: &str) -> Result<(), KvError> {
        self.store.set_ex(&keys::deployment_crashloop(namespace, deployment), "1", keys::TTL_CRASHLOOP).await
    }
}
