//! Refresh pass orchestration.
//!
//! A pass walks the inventory graph in dependency order. Each collection is
//! resolved, reconciled, written in batches, retained and post-processed
//! before the next one starts. Failures are contained to the failing
//! collection and its dependents; configuration errors abort the pass.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collection::{CollectionDescriptor, Source};
use crate::cross_link::CrossLinkResolver;
use crate::error::{InventoryError, Result};
use crate::reconciler::{BatchWriter, reconcile};
use crate::reference::{AssignedIds, AttrValue, KeyIndex, LazyRef, NaturalKey, ObservedEntity};
use crate::retention::{RetentionManager, RetentionOutcome, within_scope};
use crate::schema::{InventoryGraph, RefreshMode};
use crate::store::{InventoryStore, Scope};

/// Default number of records per write transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersisterConfig {
    /// Maximum records written per transaction.
    pub batch_size: usize,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

// =============================================================================
// Input
// =============================================================================

/// Observed entities of one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservedCollection {
    #[serde(default)]
    pub entities: Vec<ObservedEntity>,
    /// Natural keys the collector was asked to refresh. Only set by a
    /// targeted collector; retention is then limited to these keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeted_keys: Option<Vec<Vec<AttrValue>>>,
}

/// Everything the collector observed for one source in one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshBatch {
    #[serde(default)]
    pub collections: BTreeMap<String, ObservedCollection>,
}

impl RefreshBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fully enumerated collection.
    pub fn collection(mut self, name: impl Into<String>, entities: Vec<ObservedEntity>) -> Self {
        self.collections.insert(
            name.into(),
            ObservedCollection {
                entities,
                targeted_keys: None,
            },
        );
        self
    }

    /// Add a collection refreshed for `keys` only.
    pub fn targeted(
        mut self,
        name: impl Into<String>,
        entities: Vec<ObservedEntity>,
        keys: Vec<Vec<AttrValue>>,
    ) -> Self {
        self.collections.insert(
            name.into(),
            ObservedCollection {
                entities,
                targeted_keys: Some(keys),
            },
        );
        self
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// Written, retained and post-processed.
    Reconciled,
    /// Stopped by an error; batches committed before it stay committed.
    Failed,
    /// Not attempted because a dependency did not complete.
    Skipped,
    /// Not attempted because the pass was cancelled.
    Cancelled,
}

/// Outcome of one collection in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub name: String,
    pub status: CollectionStatus,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub archived: u64,
    pub deleted: u64,
    pub hook_updates: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_batch: Option<usize>,
}

impl CollectionReport {
    fn new(name: &str, status: CollectionStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            created: 0,
            updated: 0,
            unchanged: 0,
            archived: 0,
            deleted: 0,
            hook_updates: 0,
            error: None,
            failed_batch: None,
        }
    }

    fn fail(&mut self, status: CollectionStatus, err: &InventoryError) {
        self.status = status;
        self.error = Some(err.to_string());
        self.failed_batch = err.batch_index();
    }
}

/// Partial-success summary of a pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub pass_id: Uuid,
    pub tenant_id: i64,
    pub source_id: i64,
    pub mode: RefreshMode,
    pub collections: Vec<CollectionReport>,
    pub cancelled: bool,
}

impl PassSummary {
    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// True when every attempted collection was reconciled.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
            && self
                .collections
                .iter()
                .all(|c| c.status == CollectionStatus::Reconciled)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CollectionReport> {
        self.collections
            .iter()
            .filter(|c| c.status != CollectionStatus::Reconciled)
    }
}

// =============================================================================
// Persister
// =============================================================================

/// State shared by the collections of one pass.
struct PassState {
    assigned: AssignedIds,
    status: HashMap<String, CollectionStatus>,
    /// Collections this pass will reconcile.
    scheduled: HashSet<String>,
}

impl PassState {
    fn did_not_complete(&self, collection: &str) -> bool {
        self.status
            .get(collection)
            .is_some_and(|s| *s != CollectionStatus::Reconciled)
    }
}

/// Runs refresh passes of one source against a store.
pub struct Persister {
    store: Arc<dyn InventoryStore>,
    graph: InventoryGraph,
    source: Source,
    config: PersisterConfig,
}

impl Persister {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        graph: InventoryGraph,
        source: Source,
        config: PersisterConfig,
    ) -> Self {
        Self {
            store,
            graph,
            source,
            config,
        }
    }

    pub fn graph(&self) -> &InventoryGraph {
        &self.graph
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Run one pass over `batch`.
    ///
    /// Returns `Err` only for configuration errors; everything else is
    /// reported per collection in the summary.
    pub async fn persist(&self, batch: &RefreshBatch) -> Result<PassSummary> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.persist_cancellable(batch, cancel_rx).await
    }

    /// Run one pass, stopping between collections once `cancel` reads `true`.
    pub async fn persist_cancellable(
        &self,
        batch: &RefreshBatch,
        cancel: watch::Receiver<bool>,
    ) -> Result<PassSummary> {
        if let Some(name) = batch.collections.keys().find(|n| self.graph.get(n).is_none()) {
            return Err(InventoryError::UnknownCollection(name.clone()));
        }

        let mut summary = PassSummary {
            pass_id: Uuid::new_v4(),
            tenant_id: self.source.tenant_id,
            source_id: self.source.source_id,
            mode: self.graph.mode(),
            collections: Vec::new(),
            cancelled: false,
        };
        let mut pass = PassState {
            assigned: AssignedIds::new(),
            status: HashMap::new(),
            scheduled: self
                .graph
                .iter()
                .filter(|c| !c.is_cross_link())
                .filter(|c| !self.graph.is_targeted() || batch.collections.contains_key(c.name()))
                .map(|c| c.name().to_string())
                .collect(),
        };
        let empty = ObservedCollection::default();

        info!(
            pass_id = %summary.pass_id,
            tenant_id = self.source.tenant_id,
            source_id = self.source.source_id,
            mode = ?summary.mode,
            collections = pass.scheduled.len(),
            "Starting refresh pass"
        );

        for descriptor in self.graph.iter() {
            let name = descriptor.name();

            if descriptor.is_cross_link() {
                if batch.collections.contains_key(name) {
                    warn!(collection = name, "Ignoring observed entities of a cross-link collection");
                    let mut report = CollectionReport::new(name, CollectionStatus::Skipped);
                    report.error = Some("cross-link collections are resolved, not persisted".into());
                    summary.collections.push(report);
                }
                continue;
            }
            if !pass.scheduled.contains(name) {
                continue;
            }

            if summary.cancelled || *cancel.borrow() {
                if !summary.cancelled {
                    warn!(pass_id = %summary.pass_id, next = name, "Refresh pass cancelled");
                    summary.cancelled = true;
                }
                pass.status.insert(name.to_string(), CollectionStatus::Cancelled);
                summary
                    .collections
                    .push(CollectionReport::new(name, CollectionStatus::Cancelled));
                continue;
            }

            let observed = batch.collections.get(name).unwrap_or(&empty);
            let mut report = CollectionReport::new(name, CollectionStatus::Reconciled);

            let result = match descriptor.depends_on().iter().find(|d| pass.did_not_complete(d)) {
                Some(dependency) => Err(InventoryError::DependencyFailed {
                    collection: name.to_string(),
                    dependency: dependency.clone(),
                }),
                None => {
                    self.persist_collection(descriptor, observed, &mut pass, &mut report)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    info!(
                        collection = name,
                        created = report.created,
                        updated = report.updated,
                        unchanged = report.unchanged,
                        archived = report.archived,
                        deleted = report.deleted,
                        "Collection reconciled"
                    );
                }
                Err(e) if e.is_fatal() => {
                    error!(collection = name, error = %e, "Refresh pass aborted");
                    return Err(e);
                }
                Err(e @ InventoryError::DependencyFailed { .. }) => {
                    warn!(collection = name, error = %e, "Collection skipped");
                    report.fail(CollectionStatus::Skipped, &e);
                }
                Err(e) => {
                    error!(collection = name, error = %e, "Collection failed");
                    report.fail(CollectionStatus::Failed, &e);
                }
            }

            pass.status.insert(name.to_string(), report.status);
            summary.collections.push(report);
        }

        info!(
            pass_id = %summary.pass_id,
            complete = summary.is_complete(),
            cancelled = summary.cancelled,
            "Refresh pass finished"
        );
        Ok(summary)
    }

    async fn persist_collection(
        &self,
        descriptor: &CollectionDescriptor,
        observed: &ObservedCollection,
        pass: &mut PassState,
        report: &mut CollectionReport,
    ) -> Result<()> {
        let name = descriptor.name();
        let store = self.store.as_ref();
        let scope = descriptor.scope_for(&self.source);
        let batch_size = self.config.batch_size;

        self.prepare_references(descriptor, observed, pass).await?;

        let resolved = observed
            .entities
            .iter()
            .map(|e| e.resolve(name, descriptor.manager_ref(), &pass.assigned))
            .collect::<Result<Vec<_>>>()?;

        let targeted: Option<HashSet<NaturalKey>> = match (self.graph.mode(), &observed.targeted_keys) {
            (RefreshMode::Targeted, Some(keys)) => Some(
                keys.iter()
                    .map(|k| pass.assigned.resolve_key(name, k))
                    .collect::<Result<_>>()?,
            ),
            _ => None,
        };

        let stored = store
            .load_records(&scope.query(descriptor.model()).include_archived())
            .await?;
        let plan = reconcile(descriptor, resolved, stored, &self.source, &pass.assigned)?;
        let unchanged = plan.unchanged;
        report.unchanged = unchanged.len() as u64;

        let mut writer = BatchWriter::new(store, descriptor.model(), scope, batch_size);
        let written = writer.write(plan.creates, plan.updates).await;
        report.created = writer.created as u64;
        report.updated = writer.updated as u64;

        let retained = match written {
            Ok(()) => {
                let missing = within_scope(plan.missing, targeted.as_ref());
                let mut outcome = RetentionOutcome::default();
                let retained = RetentionManager::new(store, batch_size)
                    .retain(descriptor, &missing, &mut outcome)
                    .await;
                report.archived = outcome.archived;
                report.deleted = outcome.deleted;
                retained
            }
            Err(e) => Err(e),
        };

        // Committed batches reach the hook even when a later step failed;
        // they come back unchanged in the next pass and would never be seen again.
        if let Some(hook) = descriptor.hook() {
            match hook
                .after_persist(store, &scope, &writer.persisted, batch_size)
                .await
            {
                Ok(updates) => report.hook_updates = updates,
                Err(e) if retained.is_ok() => return Err(e),
                Err(e) => warn!(collection = name, error = %e, "Persist hook failed after a failed write"),
            }
        }
        retained?;

        // Partially observed and create-only collections keep stored records
        // that this pass did not see; index all of them.
        let index = if targeted.is_some() || descriptor.is_create_only() {
            self.load_index(descriptor).await?
        } else {
            let mut index = KeyIndex::new();
            for record in &unchanged {
                index.insert(record.key.clone(), record.id, &record.attributes, descriptor.secondary_refs());
            }
            for record in &writer.persisted {
                index.insert(record.key.clone(), record.id, &record.attributes, descriptor.secondary_refs());
            }
            index
        };
        pass.assigned.insert(name, index);

        Ok(())
    }

    /// Make every collection the descriptor reads from available in `pass.assigned`.
    async fn prepare_references(
        &self,
        descriptor: &CollectionDescriptor,
        observed: &ObservedCollection,
        pass: &mut PassState,
    ) -> Result<()> {
        let name = descriptor.name();

        let mut references: Vec<&LazyRef> = Vec::new();
        for entity in &observed.entities {
            references.extend(entity.references());
        }
        for key in observed.targeted_keys.iter().flatten() {
            for part in key {
                if let AttrValue::Ref(reference) = part {
                    reference.collect(&mut references);
                }
            }
        }

        let mut targets: BTreeSet<&str> = descriptor.depends_on().iter().map(String::as_str).collect();
        targets.extend(references.iter().map(|r| r.collection.as_str()));

        let mut cross_links = Vec::new();
        for target in targets {
            let dependency = self
                .graph
                .get(target)
                .ok_or_else(|| InventoryError::UnknownCollection(target.to_string()))?;
            if dependency.is_cross_link() {
                cross_links.push(dependency);
                continue;
            }
            if pass.assigned.contains(target) {
                continue;
            }
            if pass.did_not_complete(target) {
                return Err(InventoryError::DependencyFailed {
                    collection: name.to_string(),
                    dependency: target.to_string(),
                });
            }
            if pass.scheduled.contains(target) {
                return Err(InventoryError::DependencyOrderViolation {
                    collection: name.to_string(),
                    dependency: target.to_string(),
                });
            }

            let index = self.load_index(dependency).await?;
            debug!(collection = name, dependency = target, records = index.len(), "Loaded stored references");
            pass.assigned.insert(target, index);
        }

        // Cross-link keys may themselves contain references, resolve them last.
        let resolver = CrossLinkResolver::new(self.store.as_ref(), self.config.batch_size);
        for dependency in cross_links {
            let target = dependency.name();
            let mut keys = Vec::new();
            for reference in references.iter().filter(|r| r.collection == target) {
                let key = pass.assigned.resolve_key(name, &reference.key)?;
                let known = pass
                    .assigned
                    .index(target)
                    .is_some_and(|index| index.contains_key(&key));
                if !known && !keys.contains(&key) {
                    keys.push(key);
                }
            }

            let index = resolver
                .resolve(dependency, self.source.tenant_id, &keys)
                .await?;
            pass.assigned.merge(target, index);
        }

        Ok(())
    }

    /// Index of the active stored records of a collection.
    async fn load_index(&self, descriptor: &CollectionDescriptor) -> Result<KeyIndex> {
        let scope: Scope = descriptor.scope_for(&self.source);
        let records = self
            .store
            .load_records(&scope.query(descriptor.model()))
            .await?;

        let mut index = KeyIndex::new();
        for record in records {
            index.insert(record.key, record.id, &record.attributes, descriptor.secondary_refs());
        }
        Ok(index)
    }
}
