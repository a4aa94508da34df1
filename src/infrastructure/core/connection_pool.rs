use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};

/// Rejection from [`ConnectionPool::acquire`] after the wait timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection pool exhausted ({size} slots) after waiting {waited:?}")]
pub struct PoolExhausted {
    pub size: usize,
    pub waited: Duration,
}

/// Held slot; returning it to the pool is dropping it.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Bounded connection slot pool.
///
/// Acquire blocks up to `acquire_timeout` and then fails with
/// [`PoolExhausted`]. The pool never over-allocates past its size.
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
        }
    }

    pub async fn acquire(&self) -> Result<PoolSlot, PoolExhausted> {
        match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(PoolSlot { _permit: permit }),
            // Semaphore is never closed while the pool lives
            Ok(Err(_)) | Err(_) => Err(PoolExhausted {
                size: self.size,
                waited: self.acquire_timeout,
            }),
        }
    }

    pub fn try_acquire(&self) -> Result<PoolSlot, PoolExhausted> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(PoolSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => Err(PoolExhausted {
                size: self.size,
                waited: Duration::ZERO,
            }),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_pool_bounds_concurrent_holders() {
        let pool = ConnectionPool::new(2, Duration::from_millis(20));

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        // Third acquire times out instead of over-allocating
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.size, 2);

        drop(a);
        tokio_test::assert_ok!(pool.acquire().await);
    }

    #[tokio::test]
    async fn test_try_acquire_fails_fast() {
        let pool = ConnectionPool::new(1, Duration::from_secs(5));
        let _slot = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_err());
    }
}
