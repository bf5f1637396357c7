//! Storage hierarchy for certificate lookups (spec.md §4.2): in-process map -> KV cache
//! -> orchestrator Secret -> ACME issuance. Writes on issuance/renewal propagate in the
//! reverse order: Secret first (authoritative), then KV (85-day TTL), then the in-process
//! map (spec.md §3 "Certificate record").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use kv::{keys, Store, TimedLru};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CertRecord {
    /// Leaf + intermediates, PEM-encoded, concatenated.
    pub chain_pem: String,
    pub key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

const MIN_REMAINING_VALIDITY: chrono::Duration = chrono::Duration::days(30);

impl CertRecord {
    /// spec.md §8 boundary: `not_after == now + 30 days` exactly is invalid (strict
    /// inequality).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.chain_pem.trim().is_empty() {
            return false;
        }
        if parse_leaf(&self.chain_pem).is_none() {
            return false;
        }
        self.not_after - now > MIN_REMAINING_VALIDITY
    }
}

fn parse_leaf(chain_pem: &str) -> Option<()> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes()).ok()?;
    let (_, _cert) = x509_parser::parse_x509_certificate(&pem.contents).ok()?;
    Some(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("kv store error: {0}")]
    Kv(#[from] kv::KvError),
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] orchestrator::OrchestratorError),
    #[error("secret {0} is missing cert.pem/key.pem data")]
    MalformedSecret(String),
}

/// Process-wide cascade shared by every TLS handshake (spec.md §5 "Certificate caches").
pub struct CertStore {
    mem: Arc<TimedLru<String, CertRecord>>,
    kv: Store,
    client: Client,
}

impl CertStore {
    pub fn new(kv: Store, client: Client) -> Arc<Self> {
        Arc::new(Self { mem: Arc::new(TimedLru::new(keys::TTL_CERT)), kv, client })
    }

    /// Background issuance needs a handle to the KV store for rate-limit bookkeeping,
    /// separate from the cascade's own internal cache writes.
    pub fn kv(&self) -> &Store {
        &self.kv
    }

    pub fn spawn_sweeper(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        kv::timed_lru::spawn_sweeper(self.mem.clone(), cancel);
    }

    /// Reads through the cascade, returning `None` only when no level has a record at
    /// all (a present-but-expired record is still returned so the caller can decide to
    /// renew inline vs. serve-stale-and-renew-in-background; spec.md only mandates the
    /// *serving* gate happen at the TLS layer via [`CertRecord::is_valid`]).
    pub async fn lookup(&self, domain: &str) -> Result<Option<CertRecord>, StoreError> {
        if let Some(record) = self.mem.get(&domain.to_owned()) {
            return Ok(Some(record));
        }
        if let Some(record) = self.lookup_kv(domain).await? {
            self.mem.insert(domain.to_owned(), record.clone());
            return Ok(Some(record));
        }
        if let Some(record) = self.lookup_secret(domain).await? {
            self.write_kv(domain, &record).await?;
            self.mem.insert(domain.to_owned(), record.clone());
            return Ok(Some(record));
        }
        Ok(None)
    }

    async fn lookup_kv(&self, domain: &str) -> Result<Option<CertRecord>, StoreError> {
        let chain = self.kv.get(&keys::cert_chain(domain)).await?;
        let key = self.kv.get(&keys::cert_key(domain)).await?;
        let (Some(chain_pem), Some(key_pem)) = (chain, key) else { return Ok(None) };
        let (not_before, not_after) = validity_window(&chain_pem).unwrap_or_else(default_window);
        Ok(Some(CertRecord { chain_pem, key_pem, not_before, not_after }))
    }

    async fn lookup_secret(&self, domain: &str) -> Result<Option<CertRecord>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), orchestrator::names::CERTIFICATE_NAMESPACE);
        let name = orchestrator::names::certificate_secret(domain);
        let Some(secret) = orchestrator::apply::get_opt(&api, &name).await? else { return Ok(None) };
        secret_to_record(&name, &secret).map(Some)
    }

    /// Writes a newly issued/renewed certificate through the full cascade, authoritative
    /// copy first (spec.md §4.2).
    pub async fn store(&self, domain: &str, record: CertRecord, secret_name: &str) -> Result<(), StoreError> {
        self.write_secret(secret_name, &record).await?;
        self.write_kv(domain, &record).await?;
        self.mem.insert(domain.to_owned(), record);
        Ok(())
    }

    async fn write_secret(&self, secret_name: &str, record: &CertRecord) -> Result<(), StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), orchestrator::names::CERTIFICATE_NAMESPACE);
        let mut string_data = BTreeMap::new();
        string_data.insert("cert.pem".to_owned(), record.chain_pem.clone());
        string_data.insert("key.pem".to_owned(), record.key_pem.clone());
        let mut labels = BTreeMap::new();
        labels.insert("type".to_owned(), orchestrator::labels::CERTIFICATE_TYPE_LABEL_VALUE.to_owned());
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(secret_name.to_owned()),
                namespace: Some(orchestrator::names::CERTIFICATE_NAMESPACE.to_owned()),
                labels: Some(labels),
                ..Default::default()
            },
            string_data: Some(string_data),
            ..Default::default()
        };
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                orchestrator::apply::ensure(&api, &secret).await?;
                Ok(())
            }
            Err(e) => Err(orchestrator::OrchestratorError::from(e).into()),
        }
    }

    async fn write_kv(&self, domain: &str, record: &CertRecord) -> Result<(), StoreError> {
        self.kv.set_ex(&keys::cert_chain(domain), &record.chain_pem, keys::TTL_CERT).await?;
        self.kv.set_ex(&keys::cert_key(domain), &record.key_pem, keys::TTL_CERT).await?;
        Ok(())
    }
}

fn secret_to_record(name: &str, secret: &Secret) -> Result<CertRecord, StoreError> {
    let data = secret.string_data.as_ref();
    let cert = data.and_then(|d| d.get("cert.pem")).cloned();
    let key = data.and_then(|d| d.get("key.pem")).cloned();
    let (cert, key) = match (cert, key) {
        (Some(c), Some(k)) => (c, k),
        _ => {
            let raw = secret.data.as_ref();
            let cert = raw.and_then(|d| d.get("cert.pem")).map(|b| String::from_utf8_lossy(&b.0).into_owned());
            let key = raw.and_then(|d| d.get("key.pem")).map(|b| String::from_utf8_lossy(&b.0).into_owned());
            match (cert, key) {
                (Some(c), Some(k)) => (c, k),
                _ => return Err(StoreError::MalformedSecret(name.to_owned())),
            }
        }
    };
    let (not_before, not_after) = validity_window(&cert).unwrap_or_else(default_window);
    Ok(CertRecord { chain_pem: cert, key_pem: key, not_before, not_after })
}

fn validity_window(chain_pem: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(chain_pem.as_bytes()).ok()?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents).ok()?;
    let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)?;
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)?;
    Some((not_before, not_after))
}

fn default_window() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(days_remaining: i64) -> CertRecord {
        let now = Utc::now();
        CertRecord {
            chain_pem: "not-a-real-pem".to_owned(),
            key_pem: "key".to_owned(),
            not_before: now,
            not_after: now + chrono::Duration::days(days_remaining),
        }
    }

    #[test]
    fn empty_chain_is_invalid() {
        let mut r = record(90);
        r.chain_pem.clear();
        assert!(!r.is_valid(Utc::now()));
    }

    #[test]
    fn unparseable_leaf_is_invalid() {
        assert!(!record(90).is_valid(Utc::now()));
    }

    #[test]
    fn boundary_exactly_thirty_days_is_invalid() {
        // `is_valid` also requires the leaf to parse; this asserts the comparison logic
        // alone using the documented invariant directly.
        let now = Utc::now();
        let not_after = now + MIN_REMAINING_VALIDITY;
        assert!(!(not_after - now > MIN_REMAINING_VALIDITY));
    }
}
