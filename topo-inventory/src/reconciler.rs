//! Diff observed entities against stored records and write the result in
//! bounded batches.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, error};

use crate::collection::{CollectionDescriptor, DefaultContext, Source};
use crate::error::{InventoryError, Result};
use crate::reference::{AssignedIds, Attributes, ResolvedEntity};
use crate::store::{
    InventoryStore, LifecycleState, NewRecord, PersistedRecord, RecordPatch, Scope, StoredRecord,
    WriteBatch,
};

/// Update computed by [`reconcile`], with the full document after the write.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub patch: RecordPatch,
    pub attributes: Attributes,
}

/// Outcome of diffing one collection.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub creates: Vec<NewRecord>,
    pub updates: Vec<PlannedUpdate>,
    /// Matched records that need no write.
    pub unchanged: Vec<StoredRecord>,
    /// Active records not observed in this pass, ordered by id.
    pub missing: Vec<StoredRecord>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.missing.is_empty()
    }
}

/// Compute creates, updates, unchanged and missing records for one collection.
///
/// `stored` must contain archived records too: a match on an archived record
/// revives it instead of creating a new one.
pub fn reconcile(
    descriptor: &CollectionDescriptor,
    observed: Vec<ResolvedEntity>,
    stored: Vec<StoredRecord>,
    source: &Source,
    assigned: &AssignedIds,
) -> Result<ReconcilePlan> {
    let mut index: HashMap<_, StoredRecord> =
        stored.into_iter().map(|r| (r.key.clone(), r)).collect();
    let mut seen = HashSet::with_capacity(observed.len());
    let mut plan = ReconcilePlan::default();

    for entity in observed {
        if !seen.insert(entity.key.clone()) {
            return Err(InventoryError::AmbiguousReference {
                collection: descriptor.name().to_string(),
                key: entity.key,
            });
        }

        match index.remove(&entity.key) {
            None => {
                let ctx = DefaultContext::new(source, descriptor.name(), &entity.attributes, assigned);
                let mut attributes = descriptor.default_values(&ctx)?;
                attributes.extend(entity.attributes);
                plan.creates.push(NewRecord {
                    key: entity.key,
                    attributes,
                    references: entity
                        .references
                        .into_iter()
                        .filter_map(|(name, id)| id.map(|id| (name, id)))
                        .collect(),
                });
            }
            Some(record) if descriptor.is_create_only() => plan.unchanged.push(record),
            Some(record) => {
                let changed = changed_attributes(&record.attributes, &entity.attributes);
                let revive = record.state == LifecycleState::Archived;

                if changed.is_empty() && !revive {
                    plan.unchanged.push(record);
                    continue;
                }

                let references: BTreeMap<_, _> = entity
                    .references
                    .into_iter()
                    .filter(|(name, _)| changed.contains_key(name))
                    .collect();
                let mut attributes = record.attributes;
                attributes.extend(changed.clone());

                plan.updates.push(PlannedUpdate {
                    patch: RecordPatch {
                        id: record.id,
                        key: record.key,
                        changed,
                        references,
                        revive,
                    },
                    attributes,
                });
            }
        }
    }

    plan.missing = index.into_values().filter(StoredRecord::is_active).collect();
    plan.missing.sort_by_key(|r| r.id);

    debug!(
        collection = descriptor.name(),
        creates = plan.creates.len(),
        updates = plan.updates.len(),
        unchanged = plan.unchanged.len(),
        missing = plan.missing.len(),
        "Reconciled collection"
    );

    Ok(plan)
}

/// Observed attributes whose value differs from the stored one.
///
/// An absent stored attribute equals an observed null.
fn changed_attributes(stored: &Attributes, observed: &Attributes) -> Attributes {
    observed
        .iter()
        .filter(|(name, value)| match stored.get(*name) {
            Some(current) => current != *value,
            None => !value.is_null(),
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Writes creates and updates of one collection, one transaction per batch.
///
/// Batches committed before a failure stay committed and are listed in
/// `persisted`.
pub struct BatchWriter<'a> {
    store: &'a dyn InventoryStore,
    collection: &'a str,
    scope: Scope,
    batch_size: usize,
    next_batch: usize,
    pub persisted: Vec<PersistedRecord>,
    pub created: usize,
    pub updated: usize,
}

impl<'a> BatchWriter<'a> {
    pub fn new(
        store: &'a dyn InventoryStore,
        collection: &'a str,
        scope: Scope,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            collection,
            scope,
            batch_size: batch_size.max(1),
            next_batch: 0,
            persisted: Vec::new(),
            created: 0,
            updated: 0,
        }
    }

    pub async fn write(&mut self, creates: Vec<NewRecord>, updates: Vec<PlannedUpdate>) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut documents = Vec::new();

        for record in creates {
            batch.creates.push(record);
            if batch.len() == self.batch_size {
                self.flush(&mut batch, &mut documents).await?;
            }
        }
        for update in updates {
            batch.updates.push(update.patch);
            documents.push(update.attributes);
            if batch.len() == self.batch_size {
                self.flush(&mut batch, &mut documents).await?;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &mut documents).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, batch: &mut WriteBatch, documents: &mut Vec<Attributes>) -> Result<()> {
        let batch_index = self.next_batch;
        self.next_batch += 1;
        let batch = std::mem::take(batch);
        let documents = std::mem::take(documents);

        let ids = self
            .store
            .write_batch(self.collection, &self.scope, &batch)
            .await
            .map_err(|cause| {
                error!(
                    collection = self.collection,
                    batch_index,
                    size = batch.len(),
                    error = %cause,
                    "Write batch failed"
                );
                InventoryError::BatchPersist {
                    collection: self.collection.to_string(),
                    batch_index,
                    cause,
                }
            })?;

        self.created += batch.creates.len();
        self.updated += batch.updates.len();

        for (record, id) in batch.creates.into_iter().zip(ids) {
            self.persisted.push(PersistedRecord {
                id,
                key: record.key,
                attributes: record.attributes,
                created: true,
            });
        }
        for (patch, attributes) in batch.updates.into_iter().zip(documents) {
            self.persisted.push(PersistedRecord {
                id: patch.id,
                key: patch.key,
                attributes,
                created: false,
            });
        }

        debug!(collection = self.collection, batch_index, "Write batch committed");
        Ok(())
    }
}

/// String attribute, if present.
pub(crate) fn str_attribute<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a str> {
    attributes.get(name).and_then(Value::as_str)
}
