//! ACME rate-limit backoff (spec.md §4.2 "Rate limiting"): on a rate-limit error, parse
//! the `retry after <timestamp>` hint, cool down that domain/key in the KV store, and
//! refuse further issuance until the cooldown expires.

use chrono::{DateTime, Utc};
use kv::{keys, Store};

/// The well-known ACME rate-limit error URN (RFC 8555 §6.7).
pub const RATE_LIMIT_URN: &str = "urn:ietf:params:acme:error:rateLimited";

const DEFAULT_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
#[error("kv store error: {0}")]
pub struct RateLimitError(#[from] pub kv::KvError);

/// Parses an ACME problem detail's `detail` text for a `retry after <RFC3339 timestamp>`
/// hint; falls back to a 1-hour cooldown if unparseable (spec.md §4.2).
pub fn parse_retry_after(detail: &str) -> DateTime<Utc> {
    if let Some(idx) = detail.to_ascii_lowercase().find("retry after") {
        let tail = detail[idx + "retry after".len()..].trim();
        let candidate = tail.split_whitespace().next().unwrap_or(tail);
        if let Ok(ts) = DateTime::parse_from_rfc3339(candidate) {
            return ts.with_timezone(&Utc);
        }
    }
    Utc::now() + chrono::Duration::from_std(DEFAULT_COOLDOWN).unwrap()
}

pub async fn set_cooldown(store: &Store, domain: &str, until: DateTime<Utc>) -> Result<(), RateLimitError> {
    let ttl = (until - Utc::now()).to_std().unwrap_or(DEFAULT_COOLDOWN);
    store.set_ex(&keys::cert_ratelimit(domain), &until.to_rfc3339(), ttl).await?;
    Ok(())
}

pub async fn is_cooling_down(store: &Store, domain: &str) -> Result<bool, RateLimitError> {
    Ok(store.exists(&keys::cert_ratelimit(domain)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_retry_after_hint() {
        let detail = "too many requests, retry after 2026-08-01T00:00:00Z please";
        let parsed = parse_retry_after(detail);
        assert_eq!(parsed.to_rfc3339(), "2026-08-01T00:00:00+00:00");
    }

    #[test]
    fn unparseable_hint_falls_back_to_one_hour() {
        let before = Utc::now();
        let parsed = parse_retry_after("rate limited, try again soon");
        let after = Utc::now();
        assert!(parsed > before + chrono::Duration::minutes(55));
        assert!(parsed < after + chrono::Duration::minutes(65));
    }
}
