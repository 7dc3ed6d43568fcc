use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use super::{
    InventoryStore, NewTask, RecordQuery, Result, Scope, SourceFilter, StoreError, StoredRecord,
    TaskRecord, TaskUpdate, WriteBatch,
};
use crate::reference::{NaturalKey, RecordId};

/// SQLite-backed inventory store
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(data_dir: &str) -> Result<Self> {
        let db_url = format!("sqlite:{}/inventory.db?mode=rwc", data_dir);
        Self::connect(&db_url).await
    }

    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // Inventory records of every collection
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                tenant_id INTEGER NOT NULL,
                source_id INTEGER,
                natural_key TEXT NOT NULL,
                attributes TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'active',
                archived_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS records_natural_key
            ON records (collection, tenant_id, COALESCE(source_id, -1), natural_key)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Resolved references between records
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS record_refs (
                record_id INTEGER NOT NULL,
                attribute TEXT NOT NULL,
                target_id INTEGER NOT NULL,
                PRIMARY KEY (record_id, attribute),
                FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES records(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS record_refs_target ON record_refs (target_id)")
            .execute(&self.pool)
            .await?;

        // Provider tasks
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                name TEXT,
                state TEXT NOT NULL,
                status TEXT,
                target_type TEXT,
                target_source_ref TEXT,
                context TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS tasks_target ON tasks (source_id, state, target_source_ref)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // === Lookups outside the refresh path ===

    /// Record by natural key, archived records included.
    pub async fn find_record(
        &self,
        collection: &str,
        scope: &Scope,
        key: &NaturalKey,
    ) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, natural_key, attributes, state, archived_at, created_at, updated_at
            FROM records
            WHERE collection = ? AND tenant_id = ? AND COALESCE(source_id, -1) = ? AND natural_key = ?
            "#,
        )
        .bind(collection)
        .bind(scope.tenant_id)
        .bind(scope.source_id.unwrap_or(-1))
        .bind(key.to_column())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Records linking to `target_id`, as (record id, attribute) pairs.
    pub async fn references_to(&self, target_id: RecordId) -> Result<Vec<(RecordId, String)>> {
        let rows = sqlx::query(
            "SELECT record_id, attribute FROM record_refs WHERE target_id = ? ORDER BY record_id",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("record_id"), r.get("attribute")))
            .collect())
    }

    // === Task operations ===

    pub async fn create_task(&self, task: &NewTask) -> Result<RecordId> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (tenant_id, source_id, name, state, target_type, target_source_ref, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.tenant_id)
        .bind(task.source_id)
        .bind(&task.name)
        .bind(task.state.as_str())
        .bind(&task.target_type)
        .bind(&task.target_source_ref)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_task(&self, id: RecordId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, source_id, name, state, status, target_type, target_source_ref,
                   context, created_at, updated_at, completed_at
            FROM tasks WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_task).transpose()
    }
}

#[async_trait]
impl InventoryStore for SqliteStore {
    async fn load_records(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, natural_key, attributes, state, archived_at, created_at, updated_at \
             FROM records WHERE collection = ",
        );
        qb.push_bind(query.collection.clone());
        qb.push(" AND tenant_id = ").push_bind(query.tenant_id);

        match query.source {
            SourceFilter::Exactly(source_id) => {
                qb.push(" AND source_id = ").push_bind(source_id);
            }
            SourceFilter::Unscoped => {
                qb.push(" AND source_id IS NULL");
            }
            SourceFilter::Any => {}
        }

        if !query.include_archived {
            qb.push(" AND state = 'active'");
        }

        if let Some(filter) = &query.filter {
            if filter.values.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" AND json_extract(attributes, ")
                .push_bind(json_path(&filter.attribute)?)
                .push(") IN (");
            let mut values = qb.separated(", ");
            for value in &filter.values {
                match value {
                    Value::String(s) => {
                        values.push_bind(s.clone());
                    }
                    Value::Bool(b) => {
                        values.push_bind(i64::from(*b));
                    }
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => {
                            values.push_bind(i);
                        }
                        None => {
                            values.push_bind(n.as_f64());
                        }
                    },
                    other => {
                        values.push_bind(other.to_string());
                    }
                }
            }
            values.push_unseparated(")");
        }

        qb.push(" ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn write_batch(
        &self,
        collection: &str,
        scope: &Scope,
        batch: &WriteBatch,
    ) -> Result<Vec<RecordId>> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(batch.creates.len());

        for record in &batch.creates {
            let result = sqlx::query(
                r#"
                INSERT INTO records (collection, tenant_id, source_id, natural_key, attributes, state, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, 'active', ?, ?)
                "#,
            )
            .bind(collection)
            .bind(scope.tenant_id)
            .bind(scope.source_id)
            .bind(record.key.to_column())
            .bind(serde_json::to_string(&record.attributes)?)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let id = result.last_insert_rowid();
            for (attribute, target) in &record.references {
                set_link(&mut tx, id, attribute, Some(*target)).await?;
            }
            ids.push(id);
        }

        for patch in &batch.updates {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE records SET attributes = ");
            if patch.changed.is_empty() {
                qb.push("attributes");
            } else {
                qb.push("json_set(attributes");
                for (name, value) in &patch.changed {
                    qb.push(", ")
                        .push_bind(json_path(name)?)
                        .push(", json(")
                        .push_bind(value.to_string())
                        .push(")");
                }
                qb.push(")");
            }
            qb.push(", updated_at = ").push_bind(now.clone());
            if patch.revive {
                qb.push(", state = 'active', archived_at = NULL");
            }
            qb.push(" WHERE id = ")
                .push_bind(patch.id)
                .push(" AND collection = ")
                .push_bind(collection.to_string());

            let result = qb.build().execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::RecordGone(patch.id));
            }

            for (attribute, target) in &patch.references {
                set_link(&mut tx, patch.id, attribute, *target).await?;
            }
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn archive_records(
        &self,
        collection: &str,
        ids: &[RecordId],
        archived_at: &str,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE records SET state = 'archived', archived_at = ");
        qb.push_bind(archived_at.to_string())
            .push(", updated_at = ")
            .push_bind(archived_at.to_string())
            .push(" WHERE collection = ")
            .push_bind(collection.to_string())
            .push(" AND state = 'active' AND id IN (");
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_records(&self, collection: &str, ids: &[RecordId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM records WHERE collection = ");
        qb.push_bind(collection.to_string()).push(" AND id IN (");
        let mut list = qb.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn running_tasks(
        &self,
        scope: &Scope,
        target_source_refs: &[String],
    ) -> Result<Vec<TaskRecord>> {
        if target_source_refs.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, tenant_id, source_id, name, state, status, target_type, target_source_ref, \
             context, created_at, updated_at, completed_at \
             FROM tasks WHERE state = 'running' AND tenant_id = ",
        );
        qb.push_bind(scope.tenant_id);
        if let Some(source_id) = scope.source_id {
            qb.push(" AND source_id = ").push_bind(source_id);
        }
        qb.push(" AND target_source_ref IN (");
        let mut list = qb.separated(", ");
        for target in target_source_refs {
            list.push_bind(target.clone());
        }
        list.push_unseparated(") ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn update_tasks(&self, updates: &[(RecordId, TaskUpdate)]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for (id, update) in updates {
            sqlx::query(
                r#"
                UPDATE tasks
                SET state = ?, status = ?, context = ?, updated_at = ?,
                    completed_at = CASE WHEN ? = 'completed' THEN COALESCE(completed_at, ?) ELSE completed_at END
                WHERE id = ?
                "#,
            )
            .bind(update.state.as_str())
            .bind(update.status.as_str())
            .bind(serde_json::to_string(&update.context)?)
            .bind(&now)
            .bind(update.state.as_str())
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn set_link(
    conn: &mut SqliteConnection,
    record_id: RecordId,
    attribute: &str,
    target: Option<RecordId>,
) -> Result<()> {
    match target {
        Some(target_id) => {
            sqlx::query(
                r#"
                INSERT INTO record_refs (record_id, attribute, target_id) VALUES (?, ?, ?)
                ON CONFLICT (record_id, attribute) DO UPDATE SET target_id = excluded.target_id
                "#,
            )
            .bind(record_id)
            .bind(attribute)
            .bind(target_id)
            .execute(&mut *conn)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM record_refs WHERE record_id = ? AND attribute = ?")
                .bind(record_id)
                .bind(attribute)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// JSON path of a top-level attribute. SQLite ends a quoted label at the
/// next double quote and has no escape for it.
fn json_path(attribute: &str) -> Result<String> {
    if attribute.contains('"') {
        return Err(StoreError::InvalidAttribute(attribute.to_string()));
    }
    Ok(format!("$.\"{}\"", attribute))
}

fn row_to_record(row: &SqliteRow) -> Result<StoredRecord> {
    let key: String = row.try_get("natural_key")?;
    let attributes: String = row.try_get("attributes")?;
    let state: String = row.try_get("state")?;

    Ok(StoredRecord {
        id: row.try_get("id")?,
        key: NaturalKey::from_column(&key)?,
        attributes: serde_json::from_str(&attributes)?,
        state: state.parse()?,
        archived_at: row.try_get("archived_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_task(row: &SqliteRow) -> Result<TaskRecord> {
    let state: String = row.try_get("state")?;
    let status: Option<String> = row.try_get("status")?;
    let context: Option<String> = row.try_get("context")?;

    Ok(TaskRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        source_id: row.try_get("source_id")?,
        name: row.try_get("name")?,
        state: state.parse()?,
        status: status.map(|s| s.parse()).transpose()?,
        target_type: row.try_get("target_type")?,
        target_source_ref: row.try_get("target_source_ref")?,
        context: context.map(|c| serde_json::from_str(&c)).transpose()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
