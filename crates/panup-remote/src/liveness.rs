//! Cached credential validity.
//!
//! Every metadata call passes through [`Liveness::ensure`]. Within the TTL it
//! costs one shared read lock. On expiry one caller takes the write lock and
//! probes the identity endpoint; callers queued behind it find the fresh
//! timestamp and return without probing again.

use panup_core::credentials::{Credential, CredentialPool};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{RemoteError, Result};

/// Default time a successful identity check is trusted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct Liveness {
    ttl: Duration,
    last_ok: RwLock<Option<Instant>>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl Liveness {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_ok: RwLock::new(None),
        }
    }

    fn fresh(&self, last_ok: Option<Instant>) -> bool {
        last_ok.is_some_and(|at| at.elapsed() < self.ttl)
    }

    /// Make sure the pool's current credential is valid.
    ///
    /// A rejected credential is failed over exactly once and the replacement
    /// probed before giving up. Transport errors surface as they are: an
    /// unreachable service says nothing about the credential.
    pub async fn ensure<F, Fut>(&self, pool: &CredentialPool, probe: F) -> Result<()>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.fresh(*self.last_ok.read().await) {
            return Ok(());
        }

        let mut last_ok = self.last_ok.write().await;
        if self.fresh(*last_ok) {
            return Ok(());
        }

        let current = pool.current();
        tracing::debug!(token = current.index, "checking credential");
        let first = match probe(current).await {
            Ok(()) => {
                *last_ok = Some(Instant::now());
                return Ok(());
            }
            Err(e) => e,
        };
        *last_ok = None;
        if first.is_transport() {
            return Err(first);
        }

        tracing::warn!(error = %first, "credential rejected, failing over");
        let next = pool
            .failover()
            .map_err(|_| RemoteError::AllCredentialsExhausted)?;
        match probe(next).await {
            Ok(()) => {
                *last_ok = Some(Instant::now());
                Ok(())
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => Err(RemoteError::AuthFailed(format!(
                "rejected after switching token: {e}"
            ))),
        }
    }

    /// Forget the cached result so the next call re-validates.
    pub async fn invalidate(&self) {
        *self.last_ok.write().await = None;
    }
}
