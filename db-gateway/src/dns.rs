//! Dedicated 5-minute TTL DNS cache for the database gateway (spec.md §4.3 "Routing":
//! resolve `<service-name>.<namespace>.<cluster-suffix>` through a dedicated cache),
//! independent of the web gateway's own instance (spec.md §5 "two independent
//! instances, one per gateway").

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use kv::TimedLru;

const TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
#[error("dns resolution failed for {host}: {source}")]
pub struct DnsError {
    pub host: String,
    #[source]
    pub source: hickory_resolver::error::ResolveError,
}

impl utils::error::ReportableError for DnsError {
    fn error_kind(&self) -> utils::error::ErrorKind {
        utils::error::ErrorKind::Dns
    }
}

pub struct DnsCache {
    resolver: TokioAsyncResolver,
    cache: Arc<TimedLru<String, Vec<IpAddr>>>,
}

impl DnsCache {
    pub fn new() -> Arc<Self> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Arc::new(Self { resolver, cache: Arc::new(TimedLru::new(TTL)) })
    }

    pub fn spawn_sweeper(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        kv::timed_lru::spawn_sweeper(self.cache.clone(), cancel);
    }

    pub async fn resolve(&self, name: &str, namespace: &str, cluster_suffix: &str) -> Result<Vec<IpAddr>, DnsError> {
        let host = format!("{name}.{namespace}.{cluster_suffix}");
        if let Some(addrs) = self.cache.get(&host) {
            return Ok(addrs);
        }
        let response = self
            .resolver
            .lookup_ip(host.as_str())
            .await
            .map_err(|source| DnsError { host: host.clone(), source })?;
        let addrs: Vec<IpAddr> = response.iter().collect();
        self.cache.insert(host, addrs.clone());
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_defaults_to_five_minute_ttl() {
        let cache: TimedLru<String, Vec<IpAddr>> = TimedLru::new(TTL);
        assert_eq!(cache.ttl(), Duration::from_secs(300));
    }
}
