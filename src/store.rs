use crate::error::AppError;
use crate::models::Snapshot;
use chrono::{DateTime, Utc};
use std::sync::{Arc, PoisonError, RwLock};

/// Holds the latest installed [`Snapshot`].
///
/// Readers clone the `Arc` under a short read lock and keep using it after the
/// lock is released; writers swap the pointer. An installed snapshot is never
/// mutated, so a reader always sees exactly one refresh cycle.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first refresh has been installed.
    pub fn read(&self) -> Option<Arc<Snapshot>> {
        // The guarded value is a single pointer; a poisoned lock still holds a
        // whole snapshot.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current(&self) -> Result<Arc<Snapshot>, AppError> {
        self.read().ok_or(AppError::NotYetAvailable)
    }

    /// Installs `snapshot` and hands back the one it replaced.
    pub fn replace(&self, snapshot: Snapshot) -> Option<Arc<Snapshot>> {
        let next = Arc::new(snapshot);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.replace(next)
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.read().map(|s| s.last_refreshed)
    }
}
