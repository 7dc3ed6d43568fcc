mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use common::{FailingStore, SOURCE, TENANT, TestEnv, entity, reference};
use topo_inventory::store::{LifecycleState, Scope, TaskState, TaskStatus};
use topo_inventory::{
    AttrValue, CollectionDescriptor, CollectionStatus, DefaultContext, InventoryGraph,
    InventoryStore, KeyPart, NaturalKey, ObservedEntity, Persister, PersisterConfig,
    RefreshBatch, RefreshMode, Result, RetentionPolicy, Source, default_graph,
};

fn key(source_ref: &str) -> NaturalKey {
    NaturalKey::single(source_ref)
}

fn vm(source_ref: &str, flavor: &str) -> ObservedEntity {
    entity(source_ref)
        .with("name", format!("{} name", source_ref))
        .with_ref("flavor", reference("flavors", flavor))
}

fn tagging(vm: &str, tag: &str, value: &str) -> ObservedEntity {
    ObservedEntity::new()
        .with_ref("vm", reference("vms", vm))
        .with_ref("tag", reference("tags", tag))
        .with("value", value)
}

fn inventory() -> RefreshBatch {
    RefreshBatch::new()
        .collection("flavors", vec![entity("f-small"), entity("f-large")])
        .collection(
            "vms",
            vec![vm("vm-1", "f-small"), vm("vm-2", "f-large"), vm("vm-3", "f-small")],
        )
        .collection(
            "tags",
            vec![ObservedEntity::new().with("name", "env").with("description", "environment")],
        )
        .collection(
            "vm_tags",
            vec![tagging("vm-1", "env", "prod"), tagging("vm-2", "env", "dev")],
        )
}

#[tokio::test]
async fn test_second_identical_pass_is_noop() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 2);

    let first = persister.persist(&inventory()).await.unwrap();
    assert!(first.is_complete());
    assert_eq!(first.collection("vms").unwrap().created, 3);
    assert_eq!(first.collection("vm_tags").unwrap().created, 2);

    let second = persister.persist(&inventory()).await.unwrap();
    assert!(second.is_complete());
    for report in &second.collections {
        assert_eq!(report.created, 0, "{}", report.name);
        assert_eq!(report.updated, 0, "{}", report.name);
        assert_eq!(report.archived, 0, "{}", report.name);
        assert_eq!(report.deleted, 0, "{}", report.name);
    }
    assert_eq!(second.collection("vms").unwrap().unchanged, 3);
}

#[tokio::test]
async fn test_ids_stable_across_passes() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    persister.persist(&inventory()).await.unwrap();
    let before = env.record("vms", key("vm-2")).await.unwrap();

    let renamed = RefreshBatch::new()
        .collection("flavors", vec![entity("f-small"), entity("f-large")])
        .collection(
            "vms",
            vec![
                vm("vm-1", "f-small"),
                vm("vm-2", "f-small").with("name", "renamed"),
                vm("vm-3", "f-small"),
            ],
        );
    let summary = persister.persist(&renamed).await.unwrap();
    assert_eq!(summary.collection("vms").unwrap().updated, 1);

    let after = env.record("vms", key("vm-2")).await.unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(after.attributes["name"], json!("renamed"));
    assert_eq!(after.created_at, before.created_at);

    let small = env.record("flavors", key("f-small")).await.unwrap();
    assert_eq!(after.attributes["flavor"], json!(small.id));
}

#[tokio::test]
async fn test_archive_and_revive_keeps_id() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);
    let flavors = vec![entity("f-small")];

    let pass = |vms: Vec<ObservedEntity>| {
        RefreshBatch::new()
            .collection("flavors", flavors.clone())
            .collection("vms", vms)
    };

    persister
        .persist(&pass(vec![vm("vm-1", "f-small"), vm("vm-2", "f-small")]))
        .await
        .unwrap();
    let original = env.record("vms", key("vm-2")).await.unwrap();

    let summary = persister.persist(&pass(vec![vm("vm-1", "f-small")])).await.unwrap();
    assert_eq!(summary.collection("vms").unwrap().archived, 1);
    let archived = env.record("vms", key("vm-2")).await.unwrap();
    assert_eq!(archived.state, LifecycleState::Archived);
    assert!(archived.archived_at.is_some());
    assert_eq!(env.active("vms").await.len(), 1);

    // Already archived records are not archived again
    let summary = persister.persist(&pass(vec![vm("vm-1", "f-small")])).await.unwrap();
    assert_eq!(summary.collection("vms").unwrap().archived, 0);

    let summary = persister
        .persist(&pass(vec![vm("vm-1", "f-small"), vm("vm-2", "f-small")]))
        .await
        .unwrap();
    let vms = summary.collection("vms").unwrap();
    assert_eq!(vms.created, 0);
    assert_eq!(vms.updated, 1);

    let revived = env.record("vms", key("vm-2")).await.unwrap();
    assert_eq!(revived.id, original.id);
    assert_eq!(revived.state, LifecycleState::Active);
    assert_eq!(revived.archived_at, None);
}

#[tokio::test]
async fn test_create_only_never_writes_existing() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);
    let tag = |description: &str| {
        RefreshBatch::new().collection(
            "tags",
            vec![ObservedEntity::new().with("name", "env").with("description", description)],
        )
    };

    persister.persist(&tag("environment")).await.unwrap();
    let summary = persister.persist(&tag("something else")).await.unwrap();
    let tags = summary.collection("tags").unwrap();
    assert_eq!((tags.created, tags.updated, tags.unchanged), (0, 0, 1));

    // Missing tags stay untouched
    let summary = persister
        .persist(&RefreshBatch::new().collection("tags", vec![]))
        .await
        .unwrap();
    assert_eq!(summary.collection("tags").unwrap().archived, 0);

    let scope = Scope {
        tenant_id: TENANT,
        source_id: None,
    };
    let stored = env
        .store
        .find_record("tags", &scope, &key("env"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, LifecycleState::Active);
    assert_eq!(stored.attributes["description"], json!("environment"));
    assert_eq!(stored.attributes["namespace"], json!("openshift"));
}

#[tokio::test]
async fn test_existing_tags_stay_referencable() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let first = RefreshBatch::new()
        .collection("vms", vec![entity("vm-1")])
        .collection("tags", vec![ObservedEntity::new().with("name", "env")])
        .collection("vm_tags", vec![tagging("vm-1", "env", "prod")]);
    assert!(persister.persist(&first).await.unwrap().is_complete());

    // Only the new tag is observed; links to the stored one still resolve
    let second = RefreshBatch::new()
        .collection("tags", vec![ObservedEntity::new().with("name", "owner")])
        .collection(
            "vm_tags",
            vec![tagging("vm-1", "env", "prod"), tagging("vm-1", "owner", "team-a")],
        );
    let summary = persister.persist(&second).await.unwrap();
    assert!(summary.is_complete(), "{:?}", summary.failed().collect::<Vec<_>>());

    let vm_tags = summary.collection("vm_tags").unwrap();
    assert_eq!(vm_tags.status, CollectionStatus::Reconciled);
    assert_eq!((vm_tags.created, vm_tags.unchanged), (1, 1));
    assert_eq!(env.active("vm_tags").await.len(), 2);

    let scope = Scope {
        tenant_id: TENANT,
        source_id: None,
    };
    let tags = env.store.load_records(&scope.query("tags")).await.unwrap();
    assert_eq!(tags.len(), 2);
}

#[tokio::test]
async fn test_task_completed_with_error() {
    let env = TestEnv::new().await;
    let task_id = env.running_task("svc-123").await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let batch = RefreshBatch::new().collection(
        "service_instances",
        vec![
            entity("svc-123")
                .with("external_url", "http://x")
                .with("extra", json!({"finished": "2024-01-01T00:00:00Z", "status": "failed"})),
        ],
    );
    let summary = persister.persist(&batch).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.collection("service_instances").unwrap().hook_updates, 1);

    let instance = env.record("service_instances", key("svc-123")).await.unwrap();
    let task = env.task(task_id).await;
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.status, Some(TaskStatus::Error));
    assert!(task.completed_at.is_some());
    assert_eq!(
        task.context,
        Some(json!({
            "remote_status": "failed",
            "target": {"id": instance.id, "url": "http://x"}
        }))
    );
}

#[tokio::test]
async fn test_task_without_match_is_untouched() {
    let env = TestEnv::new().await;
    let task_id = env.running_task("svc-123").await;
    let before = env.task(task_id).await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let batch = RefreshBatch::new().collection(
        "service_instances",
        vec![entity("svc-999").with("extra", json!({"finished": "2024-01-01T00:00:00Z"}))],
    );
    let summary = persister.persist(&batch).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.collection("service_instances").unwrap().hook_updates, 0);

    assert_eq!(env.task(task_id).await, before);
}

#[tokio::test]
async fn test_task_still_running_until_finished() {
    let env = TestEnv::new().await;
    let task_id = env.running_task("svc-1").await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let batch = RefreshBatch::new().collection(
        "service_instances",
        vec![entity("svc-1").with("extra", json!({"status": "provisioning"}))],
    );
    persister.persist(&batch).await.unwrap();

    let task = env.task(task_id).await;
    assert_eq!(task.state, TaskState::Running);
    assert_eq!(task.status, Some(TaskStatus::Ok));
    assert_eq!(task.completed_at, None);
}

#[tokio::test]
async fn test_newest_running_task_wins() {
    let env = TestEnv::new().await;
    let older = env.running_task("svc-1").await;
    let newer = env.running_task("svc-1").await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let batch = RefreshBatch::new().collection(
        "service_instances",
        vec![entity("svc-1").with("extra", json!({"finished": "2024-01-01T00:00:00Z", "status": "ok"}))],
    );
    let summary = persister.persist(&batch).await.unwrap();
    assert_eq!(summary.collection("service_instances").unwrap().hook_updates, 1);

    assert_eq!(env.task(newer).await.state, TaskState::Completed);
    assert_eq!(env.task(older).await.state, TaskState::Running);
    assert_eq!(env.task(older).await.status, None);
}

#[tokio::test]
async fn test_tasks_synced_for_committed_batches() {
    let env = TestEnv::new().await;
    let committed = env.running_task("svc-1").await;
    let lost = env.running_task("svc-2").await;
    let store = Arc::new(FailingStore::new(env.store.clone(), "service_instances", 1));
    let persister = Persister::new(
        store,
        default_graph(RefreshMode::Targeted).unwrap(),
        Source::new(TENANT, SOURCE, "openshift"),
        PersisterConfig { batch_size: 1 },
    );

    let finished = json!({"finished": "2024-01-01T00:00:00Z", "status": "ok"});
    let batch = RefreshBatch::new().collection(
        "service_instances",
        vec![
            entity("svc-1").with("extra", finished.clone()),
            entity("svc-2").with("extra", finished),
        ],
    );
    let summary = persister.persist(&batch).await.unwrap();

    let instances = summary.collection("service_instances").unwrap();
    assert_eq!(instances.status, CollectionStatus::Failed);
    assert_eq!(instances.failed_batch, Some(1));
    assert_eq!(instances.created, 1);
    assert_eq!(instances.hook_updates, 1);

    assert_eq!(env.task(committed).await.state, TaskState::Completed);
    assert_eq!(env.task(lost).await.state, TaskState::Running);
}

fn service_instance_id(ctx: &DefaultContext<'_>) -> Result<Value> {
    let target = ctx
        .attribute("target_source_ref")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(ctx
        .assigned_id("service_instances", &NaturalKey::single(target))?
        .map(Value::from)
        .unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_dependent_collection_sees_assigned_ids() {
    let env = TestEnv::new().await;
    let graph = InventoryGraph::builder(RefreshMode::Targeted)
        .collection(
            CollectionDescriptor::builder("tasks")
                .default_value("service_instance_id", service_instance_id)
                .retention(RetentionPolicy::Archive)
                .depends_on(&["service_instances"])
                .build(),
        )
        .collection(
            CollectionDescriptor::builder("service_instances")
                .retention(RetentionPolicy::Archive)
                .build(),
        )
        .build()
        .unwrap();
    let persister = env.persister(graph, 100);

    let batch = RefreshBatch::new()
        .collection(
            "tasks",
            vec![
                entity("task-1")
                    .with("target_source_ref", "svc-123")
                    .with_ref("service_instance", reference("service_instances", "svc-123")),
            ],
        )
        .collection("service_instances", vec![entity("svc-123")]);
    let summary = persister.persist(&batch).await.unwrap();

    let names: Vec<_> = summary.collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["service_instances", "tasks"]);

    let instance = env.record("service_instances", key("svc-123")).await.unwrap();
    let task = env.record("tasks", key("task-1")).await.unwrap();
    assert_eq!(task.attributes["service_instance_id"], json!(instance.id));
    assert_eq!(task.attributes["service_instance"], json!(instance.id));
    assert_eq!(
        env.store.references_to(instance.id).await.unwrap(),
        vec![(task.id, "service_instance".to_string())]
    );
}

#[tokio::test]
async fn test_reading_unfinished_collection_aborts_pass() {
    let env = TestEnv::new().await;
    // No declared dependency: tasks runs first and reads an unfinished collection
    let graph = InventoryGraph::builder(RefreshMode::Targeted)
        .collection(
            CollectionDescriptor::builder("tasks")
                .default_value("service_instance_id", service_instance_id)
                .build(),
        )
        .collection(CollectionDescriptor::builder("service_instances").build())
        .build()
        .unwrap();
    let persister = env.persister(graph, 100);

    let batch = RefreshBatch::new()
        .collection("tasks", vec![entity("task-1").with("target_source_ref", "svc-123")])
        .collection("service_instances", vec![entity("svc-123")]);
    let err = persister.persist(&batch).await.unwrap_err();
    assert!(matches!(
        err,
        topo_inventory::InventoryError::DependencyOrderViolation { ref dependency, .. }
            if dependency == "service_instances"
    ));
}

fn attachment(volume: &str, vm: &str) -> ObservedEntity {
    ObservedEntity::new()
        .with_ref("volume", reference("volumes", volume))
        .with_ref("vm", reference("vms", vm))
        .with("device", "/dev/vdb")
}

#[tokio::test]
async fn test_join_rows_deleted_entities_archived() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let first = RefreshBatch::new()
        .collection("volumes", vec![entity("vol-1"), entity("vol-2")])
        .collection("vms", vec![entity("vm-1")])
        .collection(
            "volume_attachments",
            vec![attachment("vol-1", "vm-1"), attachment("vol-2", "vm-1")],
        );
    persister.persist(&first).await.unwrap();

    let vol_2 = env.record("volumes", key("vol-2")).await.unwrap();
    let vm_1 = env.record("vms", key("vm-1")).await.unwrap();
    let link_key = NaturalKey::new(vec![KeyPart::Int(vol_2.id), KeyPart::Int(vm_1.id)]);
    assert!(env.record("volume_attachments", link_key.clone()).await.is_some());
    assert_eq!(env.store.references_to(vol_2.id).await.unwrap().len(), 1);

    let second = RefreshBatch::new()
        .collection("volumes", vec![entity("vol-1")])
        .collection("vms", vec![entity("vm-1")])
        .collection("volume_attachments", vec![attachment("vol-1", "vm-1")]);
    let summary = persister.persist(&second).await.unwrap();

    let attachments = summary.collection("volume_attachments").unwrap();
    assert_eq!((attachments.deleted, attachments.archived), (1, 0));
    assert_eq!(summary.collection("volumes").unwrap().archived, 1);

    assert!(env.record("volume_attachments", link_key).await.is_none());
    assert_eq!(env.active("volume_attachments").await.len(), 1);
    assert_eq!(
        env.record("volumes", key("vol-2")).await.unwrap().state,
        LifecycleState::Archived
    );
    assert!(env.store.references_to(vol_2.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_batch_keeps_committed_batches() {
    let env = TestEnv::new().await;
    let store = Arc::new(FailingStore::new(env.store.clone(), "vms", 1));
    let persister = Persister::new(
        store,
        default_graph(RefreshMode::Targeted).unwrap(),
        Source::new(TENANT, SOURCE, "openshift"),
        PersisterConfig { batch_size: 2 },
    );

    let vms = (1..=5).map(|i| entity(&format!("vm-{}", i))).collect();
    let batch = RefreshBatch::new()
        .collection("flavors", vec![entity("f-small")])
        .collection("vms", vms)
        .collection("tags", vec![ObservedEntity::new().with("name", "env")])
        .collection("vm_tags", vec![tagging("vm-1", "env", "prod")]);
    let summary = persister.persist(&batch).await.unwrap();
    assert!(!summary.is_complete());

    let vms = summary.collection("vms").unwrap();
    assert_eq!(vms.status, CollectionStatus::Failed);
    assert_eq!(vms.failed_batch, Some(1));
    assert_eq!(vms.created, 2);
    assert!(vms.error.as_deref().unwrap().contains("vms"));

    assert_eq!(summary.collection("flavors").unwrap().status, CollectionStatus::Reconciled);
    assert_eq!(summary.collection("tags").unwrap().status, CollectionStatus::Reconciled);
    assert_eq!(summary.collection("vm_tags").unwrap().status, CollectionStatus::Skipped);

    assert_eq!(env.active("vms").await.len(), 2);
    assert!(env.active("vm_tags").await.is_empty());
}

#[tokio::test]
async fn test_targeted_retention_limited_to_keys() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    persister
        .persist(
            &RefreshBatch::new()
                .collection("flavors", vec![entity("f-small")])
                .collection("vms", vec![entity("vm-1"), entity("vm-2"), entity("vm-3")]),
        )
        .await
        .unwrap();

    // Refresh of vm-2 and vm-3 only: vm-3 still exists, vm-2 is gone
    let targeted = RefreshBatch::new().targeted(
        "vms",
        vec![entity("vm-3").with("power_state", "off")],
        vec![vec![AttrValue::from(json!("vm-2"))], vec![AttrValue::from(json!("vm-3"))]],
    );
    let summary = persister.persist(&targeted).await.unwrap();
    assert_eq!(summary.collections.len(), 1);
    let vms = summary.collection("vms").unwrap();
    assert_eq!((vms.updated, vms.archived), (1, 1));

    assert_eq!(env.record("vms", key("vm-1")).await.unwrap().state, LifecycleState::Active);
    assert_eq!(env.record("vms", key("vm-2")).await.unwrap().state, LifecycleState::Archived);
    assert_eq!(env.active("flavors").await.len(), 1);
}

#[tokio::test]
async fn test_full_mode_absent_collection_is_empty() {
    let env = TestEnv::new().await;
    let graph = || {
        InventoryGraph::builder(RefreshMode::Full)
            .collection(CollectionDescriptor::builder("flavors").retention(RetentionPolicy::Archive).build())
            .collection(CollectionDescriptor::builder("vms").retention(RetentionPolicy::Archive).build())
            .build()
            .unwrap()
    };

    env.persister(graph(), 100)
        .persist(
            &RefreshBatch::new()
                .collection("flavors", vec![entity("f-small")])
                .collection("vms", vec![entity("vm-1")]),
        )
        .await
        .unwrap();

    let summary = env
        .persister(graph(), 100)
        .persist(&RefreshBatch::new().collection("flavors", vec![entity("f-small")]))
        .await
        .unwrap();
    assert_eq!(summary.collection("vms").unwrap().archived, 1);
    assert!(env.active("vms").await.is_empty());
}

#[tokio::test]
async fn test_cross_link_resolves_other_source() {
    let env = TestEnv::new().await;

    // Another source of the tenant owns the VM
    env.persister_for(20, default_graph(RefreshMode::Targeted).unwrap(), 100)
        .persist(
            &RefreshBatch::new()
                .collection("vms", vec![entity("i-0abc").with("uid_ems", "uid-1")]),
        )
        .await
        .unwrap();
    let other_scope = Scope {
        tenant_id: TENANT,
        source_id: Some(20),
    };
    let vm = env
        .store
        .find_record("vms", &other_scope, &key("i-0abc"))
        .await
        .unwrap()
        .unwrap();

    let batch = RefreshBatch::new().collection(
        "container_nodes",
        vec![
            entity("node-1")
                .with("name", "worker-1")
                .with_ref("lives_on", reference("cross_link_vms", "uid-1")),
            entity("node-2")
                .with("name", "worker-2")
                .with_ref("lives_on", reference("cross_link_vms", "uid-unknown")),
        ],
    );
    let summary = env
        .persister(default_graph(RefreshMode::Targeted).unwrap(), 100)
        .persist(&batch)
        .await
        .unwrap();
    assert!(summary.is_complete());

    let node_1 = env.record("container_nodes", key("node-1")).await.unwrap();
    assert_eq!(node_1.attributes["lives_on"], json!(vm.id));
    let node_2 = env.record("container_nodes", key("node-2")).await.unwrap();
    assert_eq!(node_2.attributes["lives_on"], Value::Null);

    // The cross-linked VM is not part of this source and stays untouched
    assert!(env.active("vms").await.is_empty());
    let vm_after = env
        .store
        .find_record("vms", &other_scope, &key("i-0abc"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(vm_after, vm);
}

#[tokio::test]
async fn test_secondary_reference_by_name() {
    let env = TestEnv::new().await;
    let persister = env.persister(default_graph(RefreshMode::Targeted).unwrap(), 100);

    let batch = RefreshBatch::new()
        .collection("container_projects", vec![entity("uid-p1").with("name", "default")])
        .collection("container_nodes", vec![entity("uid-n1").with("name", "worker-1")])
        .collection(
            "container_groups",
            vec![
                entity("pod-1")
                    .with_ref(
                        "container_project",
                        topo_inventory::LazyRef::by_secondary("container_projects", "by_name", vec![json!("default")]),
                    )
                    .with_ref(
                        "container_node",
                        topo_inventory::LazyRef::by_secondary("container_nodes", "by_name", vec![json!("worker-1")]),
                    ),
            ],
        );
    persister.persist(&batch).await.unwrap();

    let project = env.record("container_projects", key("uid-p1")).await.unwrap();
    let node = env.record("container_nodes", key("uid-n1")).await.unwrap();
    let pod = env.record("container_groups", key("pod-1")).await.unwrap();
    assert_eq!(pod.attributes["container_project"], json!(project.id));
    assert_eq!(pod.attributes["container_node"], json!(node.id));

    // Later pass without the projects: the reference resolves against the store
    let containers = RefreshBatch::new()
        .collection(
            "container_groups",
            vec![
                entity("pod-1")
                    .with_ref("container_project", reference("container_projects", "uid-p1"))
                    .with("container_node", json!(node.id)),
            ],
        )
        .collection(
            "containers",
            vec![
                ObservedEntity::new()
                    .with_ref("container_group", reference("container_groups", "pod-1"))
                    .with("name", "nginx"),
            ],
        );
    let summary = persister.persist(&containers).await.unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.collection("container_groups").unwrap().unchanged, 1);

    let container_key = NaturalKey::new(vec![KeyPart::Int(pod.id), KeyPart::from("nginx")]);
    assert!(env.record("containers", container_key).await.is_some());
}
