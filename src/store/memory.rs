//! In-memory entity store.

use std::convert::Infallible;

use super::{referential_violations, EntityStore, IntegrityViolation};
use crate::snapshot::Snapshot;

/// Entity store backed by an owned snapshot.
///
/// Used by tests and as scratch space for merge rehearsals; operations are
/// infallible.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    snapshot: Snapshot,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the current contents.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl From<Snapshot> for InMemoryStore {
    fn from(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }
}

impl EntityStore for InMemoryStore {
    type Error = Infallible;

    fn read_snapshot(&self) -> Result<Snapshot, Self::Error> {
        Ok(self.snapshot.clone())
    }

    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), Self::Error> {
        self.snapshot = snapshot.clone();
        Ok(())
    }

    fn check_integrity(&self) -> Result<Vec<IntegrityViolation>, Self::Error> {
        Ok(referential_violations(&self.snapshot))
    }
}
