//! Exclusive scoped leases on a resource id with bounded wait.
//!
//! A lease is held for as long as its [`Lease`] value lives and is released
//! when it is dropped, on every exit path. Two implementations are provided:
//! - [`InProcessLeaseProvider`]: per-resource async mutexes, for a single
//!   engine instance (and the in-memory store)
//! - [`RedisLeaseProvider`]: `SET NX PX` keys with owner tokens, for several
//!   engine instances sharing one Redis

pub mod redis_lease;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::utils::metrics;

pub use redis_lease::{LeaseConfig, RedisLeaseProvider};

/// Lease key for a listing row
pub fn listing_resource(id: uuid::Uuid) -> String {
    format!("listing:{}", id)
}

/// Lease key for a settlement record
pub fn settlement_resource(id: uuid::Uuid) -> String {
    format!("settlement:{}", id)
}

/// Lease key for a wallet
pub fn wallet_resource(id: uuid::Uuid) -> String {
    format!("wallet:{}", id)
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A held lease. Dropping it releases the resource.
pub struct Lease {
    resource: String,
    acquired_at: Instant,
    release: Option<Release>,
}

impl Lease {
    pub fn new(resource: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            resource: resource.into(),
            acquired_at: Instant::now(),
            release: Some(Box::new(release)),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("resource", &self.resource)
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        metrics::track_lease_held(metrics::resource_kind(&self.resource), self.held_for());
        if let Some(release) = self.release.take() {
            release();
        }
        debug!("Lease released: {}", self.resource);
    }
}

#[async_trait]
pub trait LeaseProvider: Send + Sync {
    /// Take the lease on `resource`, waiting at most `wait`.
    /// Fails with `LockContention` when the wait elapses.
    async fn acquire(&self, resource: &str, wait: Duration) -> Result<Lease>;
}

/// Per-resource async mutexes for a single process
#[derive(Clone, Default)]
pub struct InProcessLeaseProvider {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InProcessLeaseProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources currently held or waited on
    pub fn tracked_resources(&self) -> usize {
        self.slots.len()
    }

    /// Drop the slot once no holder or waiter references it
    fn prune(slots: &DashMap<String, Arc<Mutex<()>>>, resource: &str) {
        slots.remove_if(resource, |_, slot| Arc::strong_count(slot) == 1);
    }
}

#[async_trait]
impl LeaseProvider for InProcessLeaseProvider {
    async fn acquire(&self, resource: &str, wait: Duration) -> Result<Lease> {
        let slot = self
            .slots
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(wait, slot.lock_owned()).await {
            Ok(guard) => {
                let slots = self.slots.clone();
                let key = resource.to_string();
                Ok(Lease::new(resource, move || {
                    drop(guard);
                    Self::prune(&slots, &key);
                }))
            }
            Err(_) => {
                Self::prune(&self.slots, resource);
                metrics::track_lease_contention(metrics::resource_kind(resource));
                Err(EngineError::LockContention {
                    resource: resource.to_string(),
                    waited: wait,
                })
            }
        }
    }
}
