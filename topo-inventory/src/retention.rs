//! Retention of stored records that were not observed in a pass.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::collection::{CollectionDescriptor, RetentionPolicy};
use crate::error::{InventoryError, Result};
use crate::reference::{NaturalKey, RecordId};
use crate::store::{InventoryStore, StoredRecord};

/// Counters of applied retention actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionOutcome {
    pub archived: u64,
    pub deleted: u64,
}

/// Keep only missing records inside a targeted scope.
///
/// `None` means the collection was fully enumerated.
pub fn within_scope(
    missing: Vec<StoredRecord>,
    targeted: Option<&HashSet<NaturalKey>>,
) -> Vec<StoredRecord> {
    match targeted {
        None => missing,
        Some(keys) => missing.into_iter().filter(|r| keys.contains(&r.key)).collect(),
    }
}

/// Applies a collection's retention policy in bounded batches.
pub struct RetentionManager<'a> {
    store: &'a dyn InventoryStore,
    batch_size: usize,
}

impl<'a> RetentionManager<'a> {
    pub fn new(store: &'a dyn InventoryStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Archive, delete or keep `missing` per the descriptor's policy.
    ///
    /// Counters in `outcome` cover every batch committed before a failure.
    pub async fn retain(
        &self,
        descriptor: &CollectionDescriptor,
        missing: &[StoredRecord],
        outcome: &mut RetentionOutcome,
    ) -> Result<()> {
        if missing.is_empty() {
            return Ok(());
        }

        let policy = descriptor
            .retention()
            .ok_or_else(|| InventoryError::UnknownRetentionTarget {
                collection: descriptor.name().to_string(),
            })?;

        let ids: Vec<RecordId> = missing.iter().map(|r| r.id).collect();

        match policy {
            RetentionPolicy::CreateOnly => {
                debug!(
                    collection = descriptor.name(),
                    count = ids.len(),
                    "Create-only collection, leaving missing records untouched"
                );
            }
            RetentionPolicy::Archive => {
                let archived_at = Utc::now().to_rfc3339();
                for (batch_index, chunk) in ids.chunks(self.batch_size).enumerate() {
                    outcome.archived += self
                        .store
                        .archive_records(descriptor.model(), chunk, &archived_at)
                        .await
                        .map_err(|cause| InventoryError::BatchPersist {
                            collection: descriptor.name().to_string(),
                            batch_index,
                            cause,
                        })?;
                }
                info!(collection = descriptor.name(), archived = outcome.archived, "Archived missing records");
            }
            RetentionPolicy::HardDelete => {
                for (batch_index, chunk) in ids.chunks(self.batch_size).enumerate() {
                    outcome.deleted += self
                        .store
                        .delete_records(descriptor.model(), chunk)
                        .await
                        .map_err(|cause| InventoryError::BatchPersist {
                            collection: descriptor.name().to_string(),
                            batch_index,
                            cause,
                        })?;
                }
                info!(collection = descriptor.name(), deleted = outcome.deleted, "Deleted missing records");
            }
        }

        Ok(())
    }
}
