//! ACME account lifecycle and HTTP-01 issuance (spec.md §4.2), on top of `instant-acme`.
//! The account is persisted through the same KV cascade used for certificates
//! (SPEC_FULL.md §4.2, key `acme:account`) so a restarted gateway doesn't re-register.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, OrderStatus,
};
use kv::Store;

use super::challenge::ChallengeTable;
use super::ratelimit::{self, RATE_LIMIT_URN};
use super::storage::CertRecord;

#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    #[error("acme protocol error: {0}")]
    Acme(#[from] instant_acme::Error),
    #[error("kv store error: {0}")]
    Kv(#[from] kv::KvError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("domain {0} is rate-limited, retry later")]
    RateLimited(String),
    #[error("order for {0} did not reach a valid state ({1:?})")]
    OrderFailed(String, OrderStatus),
    #[error("authorization for {0} had no usable http-01 challenge")]
    NoHttp01Challenge(String),
    #[error("key generation failed: {0}")]
    Key(#[from] rcgen::Error),
}

impl utils::error::ReportableError for AcmeError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::Certificate
    }
}

pub struct AcmeClient {
    account: Account,
    pub challenges: Arc<ChallengeTable>,
}

impl AcmeClient {
    /// Loads a persisted account from the KV store (key `acme:account`) or registers a
    /// new one, in which case the credentials are persisted for next time.
    pub async fn bootstrap(
        store: &Store,
        server_url: &str,
        email: &str,
        challenges: Arc<ChallengeTable>,
    ) -> Result<Self, AcmeError> {
        if let Some(raw) = store.get(kv::keys::ACME_ACCOUNT).await? {
            let credentials: AccountCredentials = serde_json::from_str(&raw)?;
            let account = Account::from_credentials(credentials).await?;
            return Ok(Self { account, challenges });
        }

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&format!("mailto:{email}")],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            server_url,
            None,
        )
        .await?;
        store.set(kv::keys::ACME_ACCOUNT, &serde_json::to_string(&credentials)?).await?;
        Ok(Self { account, challenges })
    }

    /// Opens a new order directly against the account, for callers (the wildcard
    /// manager) that drive the authorization/finalization steps themselves with a
    /// different challenge type than [`issue_http01`](Self::issue_http01) uses.
    pub async fn account_new_order(&self, new_order: NewOrder<'_>) -> Result<instant_acme::Order, instant_acme::Error> {
        self.account.new_order(&new_order).await
    }

    /// Issues or renews a certificate covering exactly `domains` (one entry for a
    /// per-domain cert, two for the wildcard SAN pair) via HTTP-01 or DNS-01
    /// (spec.md §4.2 "requests a two-SAN certificate containing `*.<base>` and
    /// `<base>`" for the wildcard case).
    pub async fn issue_http01(&self, store: &Store, domain: &str) -> Result<CertRecord, AcmeError> {
        if ratelimit::is_cooling_down(store, domain).await.map_err(|e| AcmeError::Kv(e.0))? {
            return Err(AcmeError::RateLimited(domain.to_owned()));
        }

        let mut order = match self
            .account
            .new_order(&NewOrder { identifiers: &[Identifier::Dns(domain.to_owned())] })
            .await
        {
            Ok(order) => order,
            Err(e) => return self.handle_order_error(store, domain, e).await,
        };

        let authorizations = order.authorizations().await?;
        for authz in &authorizations {
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }
            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| AcmeError::NoHttp01Challenge(domain.to_owned()))?;
            let key_auth = order.key_authorization(challenge);
            self.challenges.insert(&challenge.token, key_auth.as_str());
            order.set_challenge_ready(&challenge.url).await?;
        }

        let status = poll_order(&mut order).await?;
        for authz in &authorizations {
            if let Some(challenge) = authz.challenges.iter().find(|c| c.r#type == ChallengeType::Http01) {
                self.challenges.remove(&challenge.token);
            }
        }
        if !matches!(status, OrderStatus::Ready | OrderStatus::Valid) {
            return Err(AcmeError::OrderFailed(domain.to_owned(), status));
        }

        let private_key = rcgen::KeyPair::generate()?;
        let csr = order.finalize(&private_key.serialize_der()).await?;
        let chain_pem = loop {
            if let Some(chain) = order.certificate().await? {
                break chain;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        };
        let _ = csr;

        Ok(CertRecord {
            chain_pem,
            key_pem: private_key.serialize_pem(),
            not_before: Utc::now(),
            not_after: Utc::now() + chrono::Duration::days(90),
        })
    }

    async fn handle_order_error<T>(&self, store: &Store, domain: &str, error: instant_acme::Error) -> Result<T, AcmeError> {
        let message = error.to_string();
        if message.contains(RATE_LIMIT_URN) {
            let until = ratelimit::parse_retry_after(&message);
            ratelimit::set_cooldown(store, domain, until).await.map_err(|e| AcmeError::Kv(e.0))?;
            return Err(AcmeError::RateLimited(domain.to_owned()));
        }
        Err(AcmeError::Acme(error))
    }
}

async fn poll_order(order: &mut instant_acme::Order) -> Result<OrderStatus, instant_acme::Error> {
    let mut delay = Duration::from_millis(250);
    for _ in 0..10 {
        let state = order.refresh().await?;
        match state.status {
            OrderStatus::Pending | OrderStatus::Processing => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
            other => return Ok(other),
        }
    }
    Ok(order.state().status)
}
