//! Thin async wrapper over `redis`'s connection manager.
//!
//! One [`Store`] is constructed at startup (from `redis_addr`/`redis_password`/`redis_db`,
//! spec.md §6) and shared (it's cheaply `Clone`, like the teacher's connection-manager
//! based caches) across every task in a binary.

use redis::AsyncCommands;
use std::time::Duration;
use utils::error::{ErrorKind, ReportableError};

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),
}

impl ReportableError for KvError {
    fn error_kind(&self) -> ErrorKind {
        ErrorKind::Store
    }
}

#[derive(Clone)]
pub struct Store {
    manager: redis::aio::ConnectionManager,
}

impl Store {
    pub async fn connect(addr: &str, password: Option<&str>, db: i64) -> Result<Self, KvError> {
        let mut url = url::Url::parse(addr).unwrap_or_else(|_| {
            url::Url::parse(&format!("redis://{addr}")).expect("redis addr must be host:port or a redis:// url")
        });
        if let Some(password) = password {
            url.set_password(Some(password)).ok();
        }
        url.set_path(&format!("/{db}"));
        let client = redis::Client::open(url.as_str())?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        Ok(conn.exists(key).await?)
    }

    /// Blocking-pop-with-timeout from the front of `queue_name` (spec.md §4.4 "Queue
    /// contract"). Returns `None` on timeout, which the caller's poll loop treats as
    /// "nothing to do this tick".
    pub async fn blpop_one(&self, queue_name: &str, timeout: Duration) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        let result: Option<(String, String)> = conn.blpop(queue_name, timeout.as_secs_f64()).await?;
        Ok(result.map(|(_key, value)| value))
    }

    pub async fn rpush(&self, queue_name: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = conn.rpush(queue_name, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_accepts_bare_host_port() {
        // Exercises the fallback URL-parsing branch without requiring a live server.
        let addr = "localhost:6379";
        let parsed = url::Url::parse(addr)
            .unwrap_or_else(|_| url::Url::parse(&format!("redis://{addr}")).unwrap());
        assert_eq!(parsed.scheme(), "redis");
    }
}
