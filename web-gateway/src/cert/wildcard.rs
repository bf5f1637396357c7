//! Wildcard (DNS-01) certificate acquisition (spec.md §4.2, §9 "Wildcard singleton").
//! Enabled iff a wildcard base domain and a DNS-provider credential are configured.
//! Acquisition is serialized by a mutex plus an `in-progress` flag: concurrent
//! handshakes for covered subdomains observe the flag and fall back to per-domain
//! issuance rather than waiting indefinitely (spec.md §9 "do not replace it with a
//! retry-forever wait").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cloudflare::endpoints::dns::dns::{CreateDnsRecord, CreateDnsRecordParams, DeleteDnsRecord, DnsContent};
use cloudflare::framework::auth::Credentials;
use cloudflare::framework::client::async_api::Client as CloudflareClient;
use cloudflare::framework::client::ClientConfig;
use cloudflare::framework::Environment;
use instant_acme::{AuthorizationStatus, ChallengeType, Identifier, NewOrder, OrderStatus};
use tokio::sync::Mutex;

use super::acme::{AcmeClient, AcmeError};
use super::storage::CertRecord;

/// Returned when another caller is already issuing the wildcard; callers should fall
/// back to per-domain issuance rather than blocking.
#[derive(Debug, thiserror::Error)]
#[error("wildcard issuance already in progress")]
pub struct InProgress;

pub struct WildcardManager {
    base_domain: String,
    zone_id: String,
    cloudflare: CloudflareClient,
    lock: Mutex<()>,
    in_progress: AtomicBool,
}

impl WildcardManager {
    pub fn new(base_domain: String, zone_id: String, api_token: String) -> anyhow::Result<Self> {
        let cloudflare = CloudflareClient::new(Credentials::UserAuthToken { token: api_token }, ClientConfig::default(), Environment::Production)?;
        Ok(Self { base_domain, zone_id, cloudflare, lock: Mutex::new(()), in_progress: AtomicBool::new(false) })
    }

    /// `d = base ∨ d endswith "." + base` (spec.md §4.2 "Domain classification").
    pub fn covers(&self, domain: &str) -> bool {
        domain == self.base_domain || domain.ends_with(&format!(".{}", self.base_domain))
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Attempts to take the issuance slot. Returns `Err(InProgress)` immediately if
    /// another caller already holds it, rather than queueing (spec.md §9).
    pub fn try_begin(&self) -> Result<WildcardGuard<'_>, InProgress> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return Err(InProgress);
        }
        Ok(WildcardGuard { manager: self })
    }

    async fn set_txt_record(&self, name: &str, value: &str) -> anyhow::Result<String> {
        let record = self
            .cloudflare
            .request(&CreateDnsRecord {
                zone_identifier: &self.zone_id,
                params: CreateDnsRecordParams { name, content: DnsContent::TXT { content: value.to_owned() }, ttl: Some(120), proxied: None, priority: None },
            })
            .await?;
        Ok(record.result.id)
    }

    async fn delete_txt_record(&self, record_id: &str) -> anyhow::Result<()> {
        self.cloudflare.request(&DeleteDnsRecord { zone_identifier: &self.zone_id, identifier: record_id }).await?;
        Ok(())
    }

    /// Requests a two-SAN certificate for `*.<base>` and `<base>` via DNS-01
    /// (spec.md §4.2).
    pub async fn issue(&self, acme: &AcmeClient) -> Result<CertRecord, AcmeError> {
        let wildcard_name = format!("*.{}", self.base_domain);
        let mut order = acme
            .account_new_order(NewOrder {
                identifiers: &[Identifier::Dns(wildcard_name.clone()), Identifier::Dns(self.base_domain.clone())],
            })
            .await?;

        let authorizations = order.authorizations().await?;
        let mut created_records = Vec::new();
        for authz in &authorizations {
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }
            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::NoHttp01Challenge(wildcard_name.clone()))?;
            let key_auth = order.key_authorization(challenge);
            let digest = key_auth.dns_value();
            let record_name = format!("_acme-challenge.{}", self.base_domain);
            let record_id = self
                .set_txt_record(&record_name, &digest)
                .await
                .map_err(|e| AcmeError::Acme(instant_acme::Error::Other(e.to_string())))?;
            created_records.push(record_id);
            order.set_challenge_ready(&challenge.url).await?;
        }

        let status = poll(&mut order).await?;
        for record_id in created_records {
            let _ = self.delete_txt_record(&record_id).await;
        }
        if !matches!(status, OrderStatus::Ready | OrderStatus::Valid) {
            return Err(AcmeError::OrderFailed(wildcard_name, status));
        }

        let private_key = rcgen::KeyPair::generate()?;
        order.finalize(&private_key.serialize_der()).await?;
        let chain_pem = loop {
            if let Some(chain) = order.certificate().await? {
                break chain;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        };

        Ok(CertRecord { chain_pem, key_pem: private_key.serialize_pem(), not_before: Utc::now(), not_after: Utc::now() + chrono::Duration::days(90) })
    }
}

async fn poll(order: &mut instant_acme::Order) -> Result<OrderStatus, instant_acme::Error> {
    let mut delay = Duration::from_millis(250);
    for _ in 0..20 {
        let state = order.refresh().await?;
        match state.status {
            OrderStatus::Pending | OrderStatus::Processing => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
            other => return Ok(other),
        }
    }
    Ok(order.state().status)
}

pub struct WildcardGuard<'a> {
    manager: &'a WildcardManager,
}

impl Drop for WildcardGuard<'_> {
    fn drop(&mut self) {
        self.manager.in_progress.store(false, Ordering::Release);
    }
}

/// Holds the global lock for the duration of an actual acquisition, separate from the
/// fast `try_begin` flag check: the flag makes concurrent arrivals fail fast, the mutex
/// makes a sequence of non-concurrent acquisitions (e.g. renewal right after a failed
/// attempt) safe.
pub async fn with_lock<'a>(manager: &'a Arc<WildcardManager>) -> tokio::sync::MutexGuard<'a, ()> {
    manager.lock.lock().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_matches_base_and_subdomains_only() {
        let manager = WildcardManager {
            base_domain: "example.app".to_owned(),
            zone_id: "zone".to_owned(),
            cloudflare: CloudflareClient::new(Credentials::UserAuthToken { token: "x".into() }, ClientConfig::default(), Environment::Production).unwrap(),
            lock: Mutex::new(()),
            in_progress: AtomicBool::new(false),
        };
        assert!(manager.covers("example.app"));
        assert!(manager.covers("api.example.app"));
        assert!(!manager.covers("evil-example.app"));
        assert!(!manager.covers("example.app.evil.test"));
    }

    #[test]
    fn second_try_begin_fails_while_first_guard_is_held() {
        let manager = WildcardManager {
            base_domain: "example.app".to_owned(),
            zone_id: "zone".to_owned(),
            cloudflare: CloudflareClient::new(Credentials::UserAuthToken { token: "x".into() }, ClientConfig::default(), Environment::Production).unwrap(),
            lock: Mutex::new(()),
            in_progress: AtomicBool::new(false),
        };
        let _first = manager.try_begin().unwrap();
        assert!(manager.try_begin().is_err());
    }
}
