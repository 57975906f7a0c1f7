use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::lease::Lease;
use crate::lease::LeasePool;
use crate::LeaseError;
use crate::Result;

/// In-memory pool with a fixed set of resources.
///
/// Mirrors the server-side contract the harness depends on: a resource
/// held by one owner is invisible to everyone else until released.
pub struct FakeLeasePool {
    resource_type: String,
    free: Mutex<VecDeque<String>>,
    leased: DashMap<String, String>,
    heartbeats: AtomicUsize,
}

impl FakeLeasePool {
    pub fn with_resources(
        resource_type: impl Into<String>,
        names: Vec<&str>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            free: Mutex::new(names.into_iter().map(String::from).collect()),
            leased: DashMap::new(),
            heartbeats: AtomicUsize::new(0),
        }
    }

    /// Pool holding exactly one resource, the usual contention case
    pub fn single(
        resource_type: impl Into<String>,
        name: &str,
    ) -> Self {
        Self::with_resources(resource_type, vec![name])
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn holder_of(
        &self,
        name: &str,
    ) -> Option<String> {
        self.leased.get(name).map(|entry| entry.value().clone())
    }

    /// Server-side reap, as pool janitors do to expired owners
    pub fn force_release(
        &self,
        name: &str,
    ) {
        if self.leased.remove(name).is_some() {
            self.free.lock().push_back(name.to_string());
        }
    }
}

#[async_trait]
impl LeasePool for FakeLeasePool {
    async fn try_acquire(
        &self,
        resource_type: &str,
        owner: &str,
    ) -> Result<Option<Lease>> {
        if resource_type != self.resource_type {
            return Ok(None);
        }

        let Some(name) = self.free.lock().pop_front() else {
            return Ok(None);
        };
        self.leased.insert(name.clone(), owner.to_string());

        let raw = format!(r#"{{"type":"{}","name":"{}","state":"leased"}}"#, resource_type, name);
        Ok(Some(Lease {
            resource_name: name,
            resource_type: resource_type.to_string(),
            owner: owner.to_string(),
            raw,
        }))
    }

    async fn heartbeat(
        &self,
        lease: &Lease,
    ) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        match self.leased.get(&lease.resource_name) {
            Some(entry) if entry.value() == &lease.owner => Ok(()),
            _ => Err(LeaseError::PoolUnavailable(format!(
                "`{}` is not leased by `{}`",
                lease.resource_name, lease.owner
            ))
            .into()),
        }
    }

    async fn release(
        &self,
        lease: &Lease,
    ) -> Result<()> {
        let removed = self
            .leased
            .remove_if(&lease.resource_name, |_, holder| holder == &lease.owner);
        match removed {
            Some(_) => {
                self.free.lock().push_back(lease.resource_name.clone());
                Ok(())
            }
            None => Err(LeaseError::ReleaseFailed(lease.resource_name.clone()).into()),
        }
    }
}
