//! Inventory store interface.
//!
//! The reconciler only talks to the relational store through
//! [`InventoryStore`]; [`SqliteStore`] is the bundled implementation.

mod error;
mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reference::{Attributes, NaturalKey, RecordId};

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;

// =============================================================================
// Records
// =============================================================================

/// Lifecycle state of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Archived,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::Archived => "archived",
        }
    }
}

impl FromStr for LifecycleState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(LifecycleState::Active),
            "archived" => Ok(LifecycleState::Archived),
            other => Err(StoreError::Corrupt(format!("lifecycle state '{}'", other))),
        }
    }
}

/// Persisted row of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub key: NaturalKey,
    pub attributes: Attributes,
    pub state: LifecycleState,
    pub archived_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl StoredRecord {
    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }
}

/// Tenant and source a record belongs to.
///
/// Tenant-wide collections (tags, tag links) have no source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub tenant_id: i64,
    pub source_id: Option<i64>,
}

impl Scope {
    pub fn query(&self, collection: impl Into<String>) -> RecordQuery {
        RecordQuery {
            collection: collection.into(),
            tenant_id: self.tenant_id,
            source: match self.source_id {
                Some(id) => SourceFilter::Exactly(id),
                None => SourceFilter::Unscoped,
            },
            include_archived: false,
            filter: None,
        }
    }
}

/// Source restriction of a record query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFilter {
    /// Records of one source.
    Exactly(i64),
    /// Tenant-wide records without a source.
    Unscoped,
    /// Every record of the tenant, whatever its source.
    Any,
}

/// Match on one attribute of the attribute document.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    pub attribute: String,
    pub values: Vec<Value>,
}

/// Record lookup. The tenant is always explicit.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub collection: String,
    pub tenant_id: i64,
    pub source: SourceFilter,
    pub include_archived: bool,
    pub filter: Option<AttributeFilter>,
}

impl RecordQuery {
    pub fn include_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn any_source(mut self) -> Self {
        self.source = SourceFilter::Any;
        self
    }

    pub fn filter(mut self, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter = Some(AttributeFilter {
            attribute: attribute.into(),
            values,
        });
        self
    }
}

/// Record to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub key: NaturalKey,
    pub attributes: Attributes,
    /// Resolved reference attributes, mirrored into the reference links.
    pub references: BTreeMap<String, RecordId>,
}

/// Partial update of an existing record. Only `changed` attributes are written.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPatch {
    pub id: RecordId,
    pub key: NaturalKey,
    pub changed: Attributes,
    /// Changed reference attributes; `None` drops the link.
    pub references: BTreeMap<String, Option<RecordId>>,
    /// Return an archived record to `active`.
    pub revive: bool,
}

/// Writes applied in a single transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub creates: Vec<NewRecord>,
    pub updates: Vec<RecordPatch>,
}

impl WriteBatch {
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty()
    }
}

/// Record as written by the current pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRecord {
    pub id: RecordId,
    pub key: NaturalKey,
    /// Full attribute document after the write.
    pub attributes: Attributes,
    pub created: bool,
}

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Queued,
    Running,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
        }
    }
}

impl FromStr for TaskState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            other => Err(StoreError::Corrupt(format!("task state '{}'", other))),
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Ok,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Error => "error",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(TaskStatus::Ok),
            "error" => Ok(TaskStatus::Error),
            other => Err(StoreError::Corrupt(format!("task status '{}'", other))),
        }
    }
}

/// Asynchronous provider job tracked against a target entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: RecordId,
    pub tenant_id: i64,
    pub source_id: i64,
    pub name: Option<String>,
    pub state: TaskState,
    pub status: Option<TaskStatus>,
    pub target_type: Option<String>,
    pub target_source_ref: Option<String>,
    pub context: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Task to register (normally done by the ordering API, outside a refresh).
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub tenant_id: i64,
    pub source_id: i64,
    pub name: Option<String>,
    pub state: TaskState,
    pub target_type: Option<String>,
    pub target_source_ref: Option<String>,
}

/// Target entity embedded in a task context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTarget {
    pub id: RecordId,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    pub remote_status: Option<String>,
    pub target: TaskTarget,
}

/// Status update payload consumed by the task reporting API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub state: TaskState,
    pub status: TaskStatus,
    pub context: TaskContext,
}

// =============================================================================
// Store trait
// =============================================================================

/// Relational store holding the inventory.
///
/// Every write method runs in its own transaction.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Records of one collection matching `query`, ordered by id.
    ///
    /// Filter values are bound one per parameter; callers chunk large lists.
    async fn load_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>>;

    /// Apply a batch atomically. Returns the ids of `batch.creates`, in order.
    async fn write_batch(
        &self,
        collection: &str,
        scope: &Scope,
        batch: &WriteBatch,
    ) -> Result<Vec<RecordId>>;

    /// Mark active records archived. Returns the number of rows changed.
    async fn archive_records(
        &self,
        collection: &str,
        ids: &[RecordId],
        archived_at: &str,
    ) -> Result<u64>;

    /// Physically remove records; reference links to them cascade.
    async fn delete_records(&self, collection: &str, ids: &[RecordId]) -> Result<u64>;

    /// Running tasks of a source targeting one of `target_source_refs`.
    ///
    /// Targets are bound one per parameter; callers chunk large lists.
    async fn running_tasks(
        &self,
        scope: &Scope,
        target_source_refs: &[String],
    ) -> Result<Vec<TaskRecord>>;

    /// Apply task updates atomically.
    async fn update_tasks(&self, updates: &[(RecordId, TaskUpdate)]) -> Result<()>;
}
