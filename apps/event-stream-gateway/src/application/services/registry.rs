//! Stream Registry
//!
//! Owns the published stream table together with the API description
//! generated from it. Both are swapped in as one snapshot, so a reader
//! never sees a table paired with a description from another refresh.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

use super::spec::{SpecError, SpecSynchronizer};
use crate::domain::stream::StreamTable;

/// One published generation of stream configuration.
#[derive(Debug)]
pub struct RegistrySnapshot {
    /// Resolved stream table.
    pub table: Arc<StreamTable>,
    /// API description matching `table`.
    pub api_description: Arc<Value>,
    /// When this snapshot was published.
    pub published_at: DateTime<Utc>,
    /// Publication counter, starting at 1.
    pub generation: u64,
}

/// Holds the current snapshot and publishes new ones atomically.
#[derive(Debug)]
pub struct StreamRegistry {
    synchronizer: SpecSynchronizer,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl StreamRegistry {
    /// Create a registry with an initial table.
    ///
    /// # Errors
    ///
    /// Returns `SpecError` if the API description cannot be generated.
    pub fn new(synchronizer: SpecSynchronizer, table: StreamTable) -> Result<Self, SpecError> {
        let snapshot = build_snapshot(&synchronizer, table, 1)?;
        Ok(Self {
            synchronizer,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    /// The current stream table.
    #[must_use]
    pub fn table(&self) -> Arc<StreamTable> {
        Arc::clone(&self.current.read().table)
    }

    /// The current API description.
    #[must_use]
    pub fn api_description(&self) -> Arc<Value> {
        Arc::clone(&self.current.read().api_description)
    }

    /// Replace the published table.
    ///
    /// The description is generated before the swap; on failure the
    /// current snapshot stays in place.
    ///
    /// # Errors
    ///
    /// Returns `SpecError` if the API description cannot be generated.
    pub fn publish(&self, table: StreamTable) -> Result<Arc<RegistrySnapshot>, SpecError> {
        let next_generation = self.current.read().generation + 1;
        let snapshot = Arc::new(build_snapshot(&self.synchronizer, table, next_generation)?);

        *self.current.write() = Arc::clone(&snapshot);

        tracing::info!(
            streams = snapshot.table.len(),
            generation = snapshot.generation,
            "Stream table published"
        );
        Ok(snapshot)
    }
}

fn build_snapshot(
    synchronizer: &SpecSynchronizer,
    table: StreamTable,
    generation: u64,
) -> Result<RegistrySnapshot, SpecError> {
    let api_description = synchronizer.sync(&table)?;
    Ok(RegistrySnapshot {
        table: Arc::new(table),
        api_description: Arc::new(api_description),
        published_at: Utc::now(),
        generation,
    })
}
