//! Counting semaphore bounding concurrent connections (spec.md §4.3 "Capacity
//! control"): `TryAcquire` fails fast on saturation rather than queuing, so excess
//! accepts are closed immediately instead of piling up waiting for a slot.

use std::sync::Arc;

use tokio::sync::{Semaphore, TryAcquireError};

pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
}

pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(max_connections)) }
    }

    /// Fails immediately rather than waiting when at capacity (spec.md §5 "Connection
    /// semaphore... TryAcquire fails fast on saturation").
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Some(ConnectionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_succeeds_under_capacity() {
        let limiter = ConnectionLimiter::new(2);
        let a = limiter.try_acquire();
        assert!(a.is_some());
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn try_acquire_fails_fast_at_saturation() {
        let limiter = ConnectionLimiter::new(1);
        let _first = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
    }

    #[test]
    fn dropping_a_permit_frees_capacity() {
        let limiter = ConnectionLimiter::new(1);
        let first = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        drop(first);
        assert!(limiter.try_acquire().is_some());
    }
}
