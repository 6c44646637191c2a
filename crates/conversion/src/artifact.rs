//! Locally addressable storage for fetched preview artifacts.
//!
//! The viewer allocates an [`ArtifactHandle`] when it enters `ready` and
//! releases it when it leaves. The store counts both so a leak or a double
//! release shows up in [`ArtifactStore::live_count`] and
//! [`ArtifactStore::released_total`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::Artifact;

/// Opaque handle to an artifact held by an [`ArtifactStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactHandle(u64);

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact:{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    live: HashMap<ArtifactHandle, Arc<Artifact>>,
    allocated_total: u64,
    released_total: u64,
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
    inner: Mutex<Inner>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, artifact: Artifact) -> ArtifactHandle {
        let mut inner = self.lock();
        inner.next_id += 1;
        let handle = ArtifactHandle(inner.next_id);
        inner.live.insert(handle, Arc::new(artifact));
        inner.allocated_total += 1;
        tracing::debug!(%handle, "Allocated artifact");
        handle
    }

    /// Release `handle`. Returns `false` if it was already released.
    pub fn release(&self, handle: ArtifactHandle) -> bool {
        let mut inner = self.lock();
        if inner.live.remove(&handle).is_none() {
            tracing::warn!(%handle, "Artifact released twice");
            return false;
        }
        inner.released_total += 1;
        tracing::debug!(%handle, "Released artifact");
        true
    }

    pub fn get(&self, handle: ArtifactHandle) -> Option<Arc<Artifact>> {
        self.lock().live.get(&handle).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    pub fn allocated_total(&self) -> u64 {
        self.lock().allocated_total
    }

    pub fn released_total(&self) -> u64 {
        self.lock().released_total
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
