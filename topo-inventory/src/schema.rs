//! Inventory graph: every collection of a provider, in dependency order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::{
    CollectionBuilder, CollectionDescriptor, DefaultContext, RecordScope, RetentionPolicy, Strategy,
};
use crate::error::{InventoryError, Result};
use crate::task_sync::TaskStatusSync;

/// Whether a pass enumerates the whole provider or only part of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Every collection is fully enumerated; an absent one is observed-empty.
    Full,
    /// Absent collections are left alone, present ones may be restricted to
    /// the keys they target.
    #[default]
    Targeted,
}

/// Collection descriptors of one provider in a valid processing order.
#[derive(Debug, Clone)]
pub struct InventoryGraph {
    collections: Vec<Arc<CollectionDescriptor>>,
    positions: HashMap<String, usize>,
    mode: RefreshMode,
}

impl InventoryGraph {
    pub fn builder(mode: RefreshMode) -> InventoryGraphBuilder {
        InventoryGraphBuilder::new(mode)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CollectionDescriptor>> {
        self.positions.get(name).map(|&i| &self.collections[i])
    }

    /// Collections in processing order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CollectionDescriptor>> {
        self.collections.iter()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    pub fn mode(&self) -> RefreshMode {
        self.mode
    }

    pub fn is_targeted(&self) -> bool {
        self.mode == RefreshMode::Targeted
    }

    /// Same collections, other refresh mode.
    pub fn with_mode(mut self, mode: RefreshMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Builder for creating InventoryGraph
pub struct InventoryGraphBuilder {
    mode: RefreshMode,
    collections: Vec<CollectionDescriptor>,
}

impl InventoryGraphBuilder {
    pub fn new(mode: RefreshMode) -> Self {
        Self {
            mode,
            collections: Vec::new(),
        }
    }

    pub fn collection(mut self, descriptor: CollectionDescriptor) -> Self {
        self.collections.push(descriptor);
        self
    }

    /// Validate names and dependencies, then order the collections.
    ///
    /// Independent collections keep their declaration order.
    pub fn build(self) -> Result<InventoryGraph> {
        let mut names = HashSet::new();
        for c in &self.collections {
            if !names.insert(c.name().to_string()) {
                return Err(InventoryError::DuplicateCollection(c.name().to_string()));
            }
        }
        for c in &self.collections {
            if let Some(dep) = c.depends_on().iter().find(|d| !names.contains(d.as_str())) {
                return Err(InventoryError::UnknownCollection(dep.clone()));
            }
        }

        let mut pending = self.collections;
        let mut ordered: Vec<Arc<CollectionDescriptor>> = Vec::with_capacity(pending.len());
        let mut placed: HashSet<String> = HashSet::new();

        while !pending.is_empty() {
            let ready = pending
                .iter()
                .position(|c| c.depends_on().iter().all(|d| placed.contains(d)));
            match ready {
                Some(i) => {
                    let descriptor = pending.remove(i);
                    placed.insert(descriptor.name().to_string());
                    ordered.push(Arc::new(descriptor));
                }
                None => {
                    return Err(InventoryError::DependencyCycle(
                        pending.iter().map(|c| c.name().to_string()).collect(),
                    ));
                }
            }
        }

        let positions = ordered
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name().to_string(), i))
            .collect();

        Ok(InventoryGraph {
            collections: ordered,
            positions,
            mode: self.mode,
        })
    }
}

// =============================================================================
// Default provider schema
// =============================================================================

/// Collection with the common settings: keyed by `source_ref`, archived
/// when missing.
fn default_collection(name: &str) -> CollectionBuilder {
    CollectionDescriptor::builder(name).retention(RetentionPolicy::Archive)
}

fn with_name_lookup(builder: CollectionBuilder) -> CollectionBuilder {
    builder.secondary_ref("by_name", &["name"])
}

/// Join collection linking a tagged record to a tag.
fn tagging_collection(name: &str, tagged: &str, tagged_collection: &str) -> CollectionDescriptor {
    CollectionDescriptor::builder(name)
        .manager_ref(&[tagged, "tag", "value"])
        .retention(RetentionPolicy::HardDelete)
        .depends_on(&[tagged_collection, "tags"])
        .build()
}

fn tag_namespace(ctx: &DefaultContext<'_>) -> Result<Value> {
    Ok(Value::from(ctx.source_type))
}

/// Inventory graph of the default provider schema.
pub fn default_graph(mode: RefreshMode) -> Result<InventoryGraph> {
    InventoryGraph::builder(mode)
        .collection(
            default_collection("containers")
                .manager_ref(&["container_group", "name"])
                .depends_on(&["container_groups", "container_images"])
                .build(),
        )
        .collection(
            default_collection("container_groups")
                .depends_on(&["container_projects", "container_nodes"])
                .build(),
        )
        .collection(default_collection("container_images").build())
        .collection(with_name_lookup(default_collection("container_nodes")).build())
        .collection(with_name_lookup(default_collection("container_projects")).build())
        .collection(
            default_collection("container_templates")
                .depends_on(&["container_projects"])
                .build(),
        )
        .collection(default_collection("flavors").build())
        .collection(default_collection("orchestration_stacks").build())
        .collection(
            default_collection("service_instances")
                .depends_on(&["service_offerings", "service_plans", "source_regions", "subscriptions"])
                .hook(Arc::new(TaskStatusSync))
                .build(),
        )
        .collection(default_collection("service_offering_icons").build())
        .collection(
            default_collection("service_offerings")
                .depends_on(&["service_offering_icons", "source_regions", "subscriptions"])
                .build(),
        )
        .collection(
            default_collection("service_plans")
                .depends_on(&["service_offerings", "source_regions", "subscriptions"])
                .build(),
        )
        .collection(default_collection("source_regions").build())
        .collection(default_collection("subscriptions").build())
        .collection(
            default_collection("vms")
                .depends_on(&["flavors", "orchestration_stacks", "source_regions", "subscriptions"])
                .build(),
        )
        .collection(
            default_collection("volumes")
                .depends_on(&["volume_types", "source_regions", "subscriptions"])
                .build(),
        )
        .collection(default_collection("volume_types").build())
        .collection(tagging_collection("container_group_tags", "container_group", "container_groups"))
        .collection(tagging_collection("container_image_tags", "container_image", "container_images"))
        .collection(tagging_collection("container_node_tags", "container_node", "container_nodes"))
        .collection(tagging_collection("container_project_tags", "container_project", "container_projects"))
        .collection(tagging_collection("container_template_tags", "container_template", "container_templates"))
        .collection(tagging_collection("service_offering_tags", "service_offering", "service_offerings"))
        .collection(tagging_collection("vm_tags", "vm", "vms"))
        .collection(
            CollectionDescriptor::builder("tags")
                .manager_ref(&["name"])
                .retention(RetentionPolicy::CreateOnly)
                .scope(RecordScope::Tenant)
                .default_value("namespace", tag_namespace)
                .build(),
        )
        .collection(
            CollectionDescriptor::builder("volume_attachments")
                .manager_ref(&["volume", "vm"])
                .retention(RetentionPolicy::HardDelete)
                .depends_on(&["volumes", "vms"])
                .build(),
        )
        .collection(
            CollectionDescriptor::builder("cross_link_vms")
                .model("vms")
                .manager_ref(&["uid_ems"])
                .strategy(Strategy::DiffAgainstReferencedOnly)
                .scope(RecordScope::Tenant)
                .build(),
        )
        .build()
}
