//! Scoped ownership of a pooled connection handle.

use tracing::warn;

use crate::core::ConnectionPool;
use crate::error::{ExportError, Result};

/// A handle leased from a [`ConnectionPool`] for one pipeline run.
///
/// The handle goes back to the pool exactly once: through [`release`](Lease::release)
/// on the normal path, or from `Drop` if the run unwinds or its future is
/// dropped before reaching it.
pub struct Lease<'p, P: ConnectionPool> {
    pool: &'p P,
    handle: Option<P::Handle>,
}

impl<'p, P: ConnectionPool> Lease<'p, P> {
    pub fn new(pool: &'p P, handle: P::Handle) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Borrow the leased handle.
    pub fn handle_mut(&mut self) -> Result<&mut P::Handle> {
        self.handle
            .as_mut()
            .ok_or_else(|| ExportError::pool("handle already released", "pipeline lease"))
    }

    /// Return the handle to the pool.
    pub fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

impl<P: ConnectionPool> Drop for Lease<'_, P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!("Connection handle released on drop (run did not finish normally)");
            self.pool.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FakePool, SourceScript};

    #[tokio::test]
    async fn test_release_once() {
        let pool = FakePool::new(SourceScript::series(0));
        let handle = pool.acquire().await.unwrap();

        let mut lease = Lease::new(&pool, handle);
        assert!(lease.handle_mut().is_ok());
        lease.release();

        assert_eq!(pool.counters().acquired(), 1);
        assert_eq!(pool.counters().released(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let pool = FakePool::new(SourceScript::series(0));
        let handle = pool.acquire().await.unwrap();

        {
            let _lease = Lease::new(&pool, handle);
        }

        assert_eq!(pool.counters().released(), 1);
    }
}
