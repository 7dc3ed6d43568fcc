//! Collection descriptors: per entity-type refresh configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{InventoryError, Result};
use crate::reference::{AssignedIds, Attributes, NaturalKey, RecordId};
use crate::store::{InventoryStore, PersistedRecord, Scope};

/// How stored records are selected for diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Load every known record of the collection in scope and diff against it.
    DiffAgainstAllKnown,
    /// Only look up records referenced by other collections. Never writes.
    DiffAgainstReferencedOnly,
}

/// Fate of stored records that are no longer observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Soft-delete: mark archived, keep the row.
    Archive,
    /// Remove the row.
    HardDelete,
    /// Append-only: existing matches are never updated, missing ones never touched.
    CreateOnly,
}

/// Whether records belong to a source or to the whole tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordScope {
    Source,
    Tenant,
}

/// Provider source a pass refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub tenant_id: i64,
    pub source_id: i64,
    pub source_type: String,
}

impl Source {
    pub fn new(tenant_id: i64, source_id: i64, source_type: impl Into<String>) -> Self {
        Self {
            tenant_id,
            source_id,
            source_type: source_type.into(),
        }
    }
}

/// Inputs available to a default-value generator.
pub struct DefaultContext<'a> {
    pub tenant_id: i64,
    pub source_id: i64,
    pub source_type: &'a str,
    collection: &'a str,
    entity: &'a Attributes,
    assigned: &'a AssignedIds,
}

impl<'a> DefaultContext<'a> {
    pub fn new(
        source: &'a Source,
        collection: &'a str,
        entity: &'a Attributes,
        assigned: &'a AssignedIds,
    ) -> Self {
        Self {
            tenant_id: source.tenant_id,
            source_id: source.source_id,
            source_type: &source.source_type,
            collection,
            entity,
            assigned,
        }
    }

    /// Observed (resolved) attribute of the entity being created.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.entity.get(name)
    }

    /// Surrogate id assigned to `key` in another collection.
    ///
    /// Fails with `DependencyOrderViolation` if that collection has not
    /// completed yet.
    pub fn assigned_id(&self, collection: &str, key: &NaturalKey) -> Result<Option<RecordId>> {
        self.assigned.find(self.collection, collection, None, key)
    }
}

/// Pure generator of a default attribute value, applied on create.
pub type DefaultFn = fn(&DefaultContext<'_>) -> Result<Value>;

/// Custom step run after a collection's writes are committed.
#[async_trait]
pub trait PersistHook: Send + Sync {
    /// Returns the number of rows the hook modified.
    async fn after_persist(
        &self,
        store: &dyn InventoryStore,
        scope: &Scope,
        persisted: &[PersistedRecord],
        batch_size: usize,
    ) -> Result<u64>;
}

/// Immutable configuration of one collection.
#[derive(Clone)]
pub struct CollectionDescriptor {
    name: String,
    model: String,
    manager_ref: Vec<String>,
    secondary_refs: BTreeMap<String, Vec<String>>,
    defaults: BTreeMap<String, DefaultFn>,
    strategy: Strategy,
    retention: Option<RetentionPolicy>,
    scope: RecordScope,
    depends_on: Vec<String>,
    hook: Option<Arc<dyn PersistHook>>,
}

impl CollectionDescriptor {
    pub fn builder(name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection the records are stored under; differs from `name` for cross-links.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn manager_ref(&self) -> &[String] {
        &self.manager_ref
    }

    pub fn secondary_refs(&self) -> &BTreeMap<String, Vec<String>> {
        &self.secondary_refs
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn retention(&self) -> Option<RetentionPolicy> {
        self.retention
    }

    pub fn is_create_only(&self) -> bool {
        self.retention == Some(RetentionPolicy::CreateOnly)
    }

    pub fn is_cross_link(&self) -> bool {
        self.strategy == Strategy::DiffAgainstReferencedOnly
    }

    pub fn record_scope(&self) -> RecordScope {
        self.scope
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn hook(&self) -> Option<&Arc<dyn PersistHook>> {
        self.hook.as_ref()
    }

    /// Tenant/source the records of this collection are written under.
    pub fn scope_for(&self, source: &Source) -> Scope {
        Scope {
            tenant_id: source.tenant_id,
            source_id: match self.scope {
                RecordScope::Source => Some(source.source_id),
                RecordScope::Tenant => None,
            },
        }
    }

    /// Evaluate default generators for a new record.
    pub fn default_values(&self, ctx: &DefaultContext<'_>) -> Result<Attributes> {
        let mut values = Attributes::new();
        for (attribute, generate) in &self.defaults {
            let value = generate(ctx).map_err(|e| match e {
                e if e.is_fatal() => e,
                other => InventoryError::DefaultValue {
                    collection: self.name.clone(),
                    attribute: attribute.clone(),
                    message: other.to_string(),
                },
            })?;
            values.insert(attribute.clone(), value);
        }
        Ok(values)
    }
}

impl fmt::Debug for CollectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDescriptor")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("manager_ref", &self.manager_ref)
            .field("secondary_refs", &self.secondary_refs)
            .field("defaults", &self.defaults.keys().collect::<Vec<_>>())
            .field("strategy", &self.strategy)
            .field("retention", &self.retention)
            .field("scope", &self.scope)
            .field("depends_on", &self.depends_on)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Builder for creating CollectionDescriptor
pub struct CollectionBuilder {
    descriptor: CollectionDescriptor,
}

impl CollectionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            descriptor: CollectionDescriptor {
                model: name.clone(),
                name,
                manager_ref: vec!["source_ref".to_string()],
                secondary_refs: BTreeMap::new(),
                defaults: BTreeMap::new(),
                strategy: Strategy::DiffAgainstAllKnown,
                retention: None,
                scope: RecordScope::Source,
                depends_on: Vec::new(),
                hook: None,
            },
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.descriptor.model = model.into();
        self
    }

    pub fn manager_ref(mut self, attributes: &[&str]) -> Self {
        if !attributes.is_empty() {
            self.descriptor.manager_ref = attributes.iter().map(|a| a.to_string()).collect();
        }
        self
    }

    pub fn secondary_ref(mut self, name: impl Into<String>, attributes: &[&str]) -> Self {
        self.descriptor.secondary_refs.insert(
            name.into(),
            attributes.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn default_value(mut self, attribute: impl Into<String>, generate: DefaultFn) -> Self {
        self.descriptor.defaults.insert(attribute.into(), generate);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.descriptor.strategy = strategy;
        self
    }

    pub fn retention(mut self, retention: RetentionPolicy) -> Self {
        self.descriptor.retention = Some(retention);
        self
    }

    pub fn scope(mut self, scope: RecordScope) -> Self {
        self.descriptor.scope = scope;
        self
    }

    pub fn depends_on(mut self, collections: &[&str]) -> Self {
        for c in collections {
            if !self.descriptor.depends_on.iter().any(|d| d == c) {
                self.descriptor.depends_on.push(c.to_string());
            }
        }
        self
    }

    pub fn hook(mut self, hook: Arc<dyn PersistHook>) -> Self {
        self.descriptor.hook = Some(hook);
        self
    }

    pub fn build(self) -> CollectionDescriptor {
        self.descriptor
    }
}
