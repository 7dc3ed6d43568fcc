//! Task status synchronization: match running tasks to the service instances
//! they target and update their state from the freshly observed data.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::collection::PersistHook;
use crate::error::{InventoryError, Result};
use crate::reconciler::str_attribute;
use crate::store::{
    InventoryStore, PersistedRecord, Scope, TaskContext, TaskRecord, TaskState, TaskStatus,
    TaskTarget, TaskUpdate,
};

/// Remote statuses reported as task failures.
const FAILURE_STATUSES: &[&str] = &["error", "failed"];

/// Collection name reported for failed task batches.
const TASKS: &str = "tasks";

/// Post-persist hook of the `service_instances` collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskStatusSync;

#[async_trait]
impl PersistHook for TaskStatusSync {
    async fn after_persist(
        &self,
        store: &dyn InventoryStore,
        scope: &Scope,
        persisted: &[PersistedRecord],
        batch_size: usize,
    ) -> Result<u64> {
        sync(store, scope, persisted, batch_size).await
    }
}

/// Update the running tasks of `scope` that target one of `targets`.
///
/// Returns the number of tasks updated. Batches committed before a failure
/// stay committed.
pub async fn sync(
    store: &dyn InventoryStore,
    scope: &Scope,
    targets: &[PersistedRecord],
    batch_size: usize,
) -> Result<u64> {
    let refs: BTreeSet<String> = targets
        .iter()
        .filter_map(|t| str_attribute(&t.attributes, "source_ref"))
        .map(str::to_string)
        .collect();
    if refs.is_empty() {
        return Ok(0);
    }

    let batch_size = batch_size.max(1);
    let refs: Vec<String> = refs.into_iter().collect();
    let mut running = Vec::new();
    for chunk in refs.chunks(batch_size) {
        running.extend(store.running_tasks(scope, chunk).await?);
    }
    let tasks = index_by_target(running);

    let mut updated = 0u64;
    for (batch_index, chunk) in targets.chunks(batch_size).enumerate() {
        let updates: Vec<_> = chunk
            .iter()
            .filter_map(|target| {
                let source_ref = str_attribute(&target.attributes, "source_ref")?;
                let task = tasks.get(source_ref)?;
                Some((task.id, task_update(target)))
            })
            .collect();
        if updates.is_empty() {
            continue;
        }

        store
            .update_tasks(&updates)
            .await
            .map_err(|cause| InventoryError::BatchPersist {
                collection: TASKS.to_string(),
                batch_index,
                cause,
            })?;
        updated += updates.len() as u64;
        debug!(batch_index, count = updates.len(), "Task batch updated");
    }

    info!(
        targets = targets.len(),
        running = tasks.len(),
        updated,
        "Synchronized task status"
    );
    Ok(updated)
}

/// Task payload derived from a persisted service instance.
pub fn task_update(target: &PersistedRecord) -> TaskUpdate {
    let extra = target.attributes.get("extra");
    let extra_str = |name: &str| extra.and_then(|e| e.get(name)).and_then(Value::as_str);

    let remote_status = extra_str("status").map(str::to_string);
    let finished = extra_str("finished").is_some_and(|f| !f.is_empty());

    let failed = remote_status
        .as_deref()
        .is_some_and(|s| FAILURE_STATUSES.iter().any(|f| s.eq_ignore_ascii_case(f)));

    TaskUpdate {
        state: if finished {
            TaskState::Completed
        } else {
            TaskState::Running
        },
        status: if failed { TaskStatus::Error } else { TaskStatus::Ok },
        context: TaskContext {
            remote_status,
            target: TaskTarget {
                id: target.id,
                url: str_attribute(&target.attributes, "external_url").map(str::to_string),
            },
        },
    }
}

/// Index running tasks by target. Several tasks on one target: the most
/// recently created wins, then the highest id.
fn index_by_target(tasks: Vec<TaskRecord>) -> HashMap<String, TaskRecord> {
    let mut index: HashMap<String, TaskRecord> = HashMap::new();

    for task in tasks {
        let Some(target) = task.target_source_ref.clone() else {
            continue;
        };
        match index.get(&target) {
            None => {
                index.insert(target, task);
            }
            Some(current) => {
                let (keep, drop) = if is_newer(&task, current) {
                    (task.clone(), current.id)
                } else {
                    (current.clone(), task.id)
                };
                warn!(
                    target_source_ref = %target,
                    kept = keep.id,
                    ignored = drop,
                    "Several running tasks target the same entity"
                );
                index.insert(target, keep);
            }
        }
    }

    index
}

fn is_newer(candidate: &TaskRecord, current: &TaskRecord) -> bool {
    let created = |t: &TaskRecord| DateTime::<FixedOffset>::parse_from_rfc3339(&t.created_at).ok();
    match (created(candidate), created(current)) {
        (Some(a), Some(b)) if a != b => a > b,
        _ => candidate.id > current.id,
    }
}
