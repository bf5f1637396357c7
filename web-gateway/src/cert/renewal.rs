//! Periodic renewal sweep (spec.md §4.2 "Renewal"): every 24h, scan the domains this
//! gateway currently routes and renew whichever per-domain certificate is missing or
//! near-expiring; separately check and renew the wildcard record the same way, via
//! DNS-01, when one is configured.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::acme::AcmeClient;
use super::storage::CertStore;
use super::wildcard::{self, WildcardManager};
use crate::routing::RoutingTable;
use orchestrator::names;

const RENEWAL_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Spawns the 24h renewal timer as a background task bound to `cancel`.
pub fn spawn(
    routing: Arc<RoutingTable>,
    store: Arc<CertStore>,
    acme: Arc<AcmeClient>,
    wildcard: Option<Arc<WildcardManager>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RENEWAL_INTERVAL) => {
                    run_once(&routing, &store, &acme, wildcard.as_ref()).await;
                }
                _ = cancel.cancelled() => return,
            }
        }
    });
}

async fn run_once(routing: &Arc<RoutingTable>, store: &Arc<CertStore>, acme: &Arc<AcmeClient>, wildcard: Option<&Arc<WildcardManager>>) {
    if let Some(wildcard) = wildcard {
        renew_wildcard_if_needed(store, acme, wildcard).await;
    }

    for domain in routing.domains() {
        // Subdomains covered by the wildcard are excluded from per-domain renewal
        // (spec.md §4.2 "Domain classification").
        if wildcard.is_some_and(|w| w.covers(&domain)) {
            continue;
        }
        renew_domain_if_needed(store, acme, &domain).await;
    }
}

async fn renew_domain_if_needed(store: &Arc<CertStore>, acme: &Arc<AcmeClient>, domain: &str) {
    let needs_renewal = match store.lookup(domain).await {
        Ok(Some(record)) => !record.is_valid(chrono::Utc::now()),
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(%domain, error = %e, "renewal lookup failed");
            return;
        }
    };
    if !needs_renewal {
        return;
    }

    tracing::info!(%domain, "renewing certificate");
    let record = match acme.issue_http01(store.kv(), domain).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(%domain, error = %e, "certificate renewal failed");
            return;
        }
    };
    let secret_name = names::certificate_secret(domain);
    if let Err(e) = store.store(domain, record, &secret_name).await {
        tracing::warn!(%domain, error = %e, "failed to persist renewed certificate");
    }
}

async fn renew_wildcard_if_needed(store: &Arc<CertStore>, acme: &Arc<AcmeClient>, wildcard: &Arc<WildcardManager>) {
    let base = wildcard.base_domain().to_owned();
    let needs_renewal = match store.lookup(&base).await {
        Ok(Some(record)) => !record.is_valid(chrono::Utc::now()),
        Ok(None) => true,
        Err(e) => {
            tracing::warn!(domain = %base, error = %e, "wildcard renewal lookup failed");
            return;
        }
    };
    if !needs_renewal {
        return;
    }

    let Ok(_guard) = wildcard.try_begin() else {
        tracing::debug!(domain = %base, "wildcard issuance already in progress; skipping this tick");
        return;
    };
    let _lock = wildcard::with_lock(wildcard).await;

    tracing::info!(domain = %base, "renewing wildcard certificate");
    let record = match wildcard.issue(acme).await {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(domain = %base, error = %e, "wildcard renewal failed");
            return;
        }
    };
    let secret_name = names::wildcard_certificate_secret(&base);
    if let Err(e) = store.store(&base, record, &secret_name).await {
        tracing::warn!(domain = %base, error = %e, "failed to persist renewed wildcard certificate");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_interval_matches_spec() {
        assert_eq!(RENEWAL_INTERVAL, Duration::from_secs(24 * 3600));
    }
}
