//! topo-inventory: reconciles collected provider inventory into a persisted store
//!
//! A refresh pass takes the entities a collector observed for one source,
//! diffs them against the stored records collection by collection, and
//! creates, updates, archives or deletes records so that the store reflects
//! the provider's current state.

pub mod collection;
pub mod cross_link;
pub mod error;
pub mod persister;
pub mod reconciler;
pub mod reference;
pub mod retention;
pub mod schema;
pub mod store;
pub mod task_sync;

pub use collection::{
    CollectionBuilder, CollectionDescriptor, DefaultContext, DefaultFn, PersistHook, RecordScope,
    RetentionPolicy, Source, Strategy,
};
pub use error::{InventoryError, Result};
pub use persister::{
    CollectionReport, CollectionStatus, ObservedCollection, PassSummary, Persister, PersisterConfig,
    RefreshBatch,
};
pub use reference::{AttrValue, KeyPart, LazyRef, NaturalKey, ObservedEntity, RecordId};
pub use schema::{InventoryGraph, RefreshMode, default_graph};
pub use store::{InventoryStore, SqliteStore, StoreError};
