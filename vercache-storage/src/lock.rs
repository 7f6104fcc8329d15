//! Record lock coordinator.
//!
//! Advisory per-record mutual exclusion built on the engine's single atomic
//! primitive, [`DocumentEngine::find_one_and_update`]. A lock is held by the
//! request whose token matches `locked.lockedBy`; it is free when absent,
//! malformed, or older than the staleness threshold.
//!
//! ```text
//! acquire ─→ conditional update ─→ holder == me ──→ Ok(envelope)
//!                  ↑                    │
//!                  │               holder != me
//!                  │                    ↓
//!                  └──── sleep ←── cancelled? deadline? max wait?
//! ```
//!
//! The wait is bounded by the request's cancellation signal, its deadline,
//! and the optional configured maximum wait.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::time::Instant;
use vercache_core::{
    CacheResult, CacheStorageConfig, CacheStorageError, DocKey, Envelope, Operation,
    RequestContext, Timestamp,
};

use crate::engine::{ConditionalUpdate, DocumentEngine};

/// Lock acquisition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockCoordinator {
    stale_after: Duration,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl LockCoordinator {
    pub fn new(stale_after: Duration, poll_interval: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            stale_after,
            poll_interval,
            max_wait,
        }
    }

    pub fn from_config(config: &CacheStorageConfig) -> Self {
        Self::new(
            config.lock_stale_after,
            config.lock_poll_interval,
            config.lock_max_wait,
        )
    }

    /// Locks taken before the returned instant are stale.
    fn stale_before(&self, now: Timestamp) -> Timestamp {
        TimeDelta::from_std(self.stale_after)
            .ok()
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
    }

    /// Block until `ctx` holds the lock on `key`, returning the locked
    /// envelope.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no record exists under `key`
    /// - `Cancelled` if the context is cancelled while waiting
    /// - `DeadlineExceeded` if the context deadline or the maximum wait
    ///   passes while another holder keeps the lock
    /// - `Engine` on any storage failure, without retrying
    pub async fn acquire<E>(
        &self,
        engine: &E,
        ctx: &RequestContext,
        key: &DocKey,
    ) -> CacheResult<Envelope>
    where
        E: DocumentEngine + ?Sized,
    {
        let token = ctx.lock_token();
        let started = Instant::now();
        let limit = match (ctx.deadline(), self.max_wait.map(|wait| started + wait)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let mut attempts: u32 = 0;

        loop {
            let now = Utc::now();
            let update = ConditionalUpdate::Acquire {
                token: token.to_string(),
                now,
                stale_before: self.stale_before(now),
            };
            attempts += 1;

            let Some(envelope) = engine.find_one_and_update(key, &update).await? else {
                return Err(CacheStorageError::missing(&key.collection, &key.id, &key.ver));
            };

            match envelope.lock_holder() {
                Some(holder) if holder == token => {
                    tracing::debug!(key = %key, token, attempts, "Record lock acquired");
                    return Ok(envelope);
                }
                holder => {
                    tracing::trace!(key = %key, holder = ?holder, attempts, "Record lock contended");
                }
            }

            if ctx.is_cancelled() {
                return Err(CacheStorageError::Cancelled);
            }
            let wake = Instant::now() + self.poll_interval;
            let wake = match limit {
                Some(limit) if Instant::now() >= limit => {
                    tracing::warn!(key = %key, token, attempts, "Gave up waiting for record lock");
                    return Err(CacheStorageError::DeadlineExceeded {
                        operation: Operation::GetAndLockById,
                        target: key.to_string(),
                    });
                }
                Some(limit) => wake.min(limit),
                None => wake,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = ctx.cancelled() => return Err(CacheStorageError::Cancelled),
            }
        }
    }

    /// Clear the lock on `key` if `ctx` holds it. A lock held by another
    /// request is left untouched and the call still succeeds.
    ///
    /// # Errors
    ///
    /// `NotFound` if no record exists under `key`.
    pub async fn release<E>(&self, engine: &E, ctx: &RequestContext, key: &DocKey) -> CacheResult<()>
    where
        E: DocumentEngine + ?Sized,
    {
        let update = ConditionalUpdate::Release {
            token: ctx.lock_token().to_string(),
        };
        match engine.find_one_and_update(key, &update).await? {
            Some(envelope) => {
                if envelope.locked.is_some() {
                    tracing::debug!(key = %key, holder = ?envelope.lock_holder(), "Release skipped, lock held elsewhere");
                }
                Ok(())
            }
            None => Err(CacheStorageError::missing(&key.collection, &key.id, &key.ver)),
        }
    }
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::from_config(&CacheStorageConfig::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================
