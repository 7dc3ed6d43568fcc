//! Shared helpers for refresh pass tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use topo_inventory::store::{
    NewTask, RecordQuery, Result, Scope, StoredRecord, TaskRecord, TaskState, TaskUpdate,
    WriteBatch,
};
use topo_inventory::{
    InventoryGraph, InventoryStore, LazyRef, NaturalKey, ObservedEntity, Persister,
    PersisterConfig, RecordId, Source, SqliteStore, StoreError,
};

pub const TENANT: i64 = 1;
pub const SOURCE: i64 = 10;

pub struct TestEnv {
    pub store: Arc<SqliteStore>,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().to_str().unwrap()).await.unwrap();
        Self {
            store: Arc::new(store),
            _dir: dir,
        }
    }

    pub fn persister(&self, graph: InventoryGraph, batch_size: usize) -> Persister {
        self.persister_for(SOURCE, graph, batch_size)
    }

    pub fn persister_for(&self, source_id: i64, graph: InventoryGraph, batch_size: usize) -> Persister {
        Persister::new(
            self.store.clone(),
            graph,
            Source::new(TENANT, source_id, "openshift"),
            PersisterConfig { batch_size },
        )
    }

    /// Record of the test source, archived included.
    pub async fn record(&self, collection: &str, key: NaturalKey) -> Option<StoredRecord> {
        self.store
            .find_record(collection, &source_scope(), &key)
            .await
            .unwrap()
    }

    pub async fn active(&self, collection: &str) -> Vec<StoredRecord> {
        self.store
            .load_records(&source_scope().query(collection))
            .await
            .unwrap()
    }

    pub async fn running_task(&self, target: &str) -> RecordId {
        self.store
            .create_task(&NewTask {
                tenant_id: TENANT,
                source_id: SOURCE,
                name: Some(format!("order {}", target)),
                state: TaskState::Running,
                target_type: Some("ServiceInstance".into()),
                target_source_ref: Some(target.into()),
            })
            .await
            .unwrap()
    }

    pub async fn task(&self, id: RecordId) -> TaskRecord {
        self.store.get_task(id).await.unwrap().unwrap()
    }
}

pub fn source_scope() -> Scope {
    Scope {
        tenant_id: TENANT,
        source_id: Some(SOURCE),
    }
}

pub fn entity(source_ref: &str) -> ObservedEntity {
    ObservedEntity::new().with("source_ref", source_ref)
}

pub fn reference(collection: &str, key: &str) -> LazyRef {
    LazyRef::new(collection, vec![Value::from(key)])
}

/// Store whose `write_batch` fails for one collection at one batch index.
pub struct FailingStore {
    inner: Arc<SqliteStore>,
    collection: String,
    fail_at: usize,
    calls: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<SqliteStore>, collection: &str, fail_at: usize) -> Self {
        Self {
            inner,
            collection: collection.to_string(),
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InventoryStore for FailingStore {
    async fn load_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>> {
        self.inner.load_records(query).await
    }

    async fn write_batch(
        &self,
        collection: &str,
        scope: &Scope,
        batch: &WriteBatch,
    ) -> Result<Vec<RecordId>> {
        if collection == self.collection && self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "injected write failure".into(),
            )));
        }
        self.inner.write_batch(collection, scope, batch).await
    }

    async fn archive_records(
        &self,
        collection: &str,
        ids: &[RecordId],
        archived_at: &str,
    ) -> Result<u64> {
        self.inner.archive_records(collection, ids, archived_at).await
    }

    async fn delete_records(&self, collection: &str, ids: &[RecordId]) -> Result<u64> {
        self.inner.delete_records(collection, ids).await
    }

    async fn running_tasks(
        &self,
        scope: &Scope,
        target_source_refs: &[String],
    ) -> Result<Vec<TaskRecord>> {
        self.inner.running_tasks(scope, target_source_refs).await
    }

    async fn update_tasks(&self, updates: &[(RecordId, TaskUpdate)]) -> Result<()> {
        self.inner.update_tasks(updates).await
    }
}
