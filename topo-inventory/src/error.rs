//! Error types for a refresh pass.

use thiserror::Error;

use crate::reference::NaturalKey;
use crate::store::StoreError;

/// Errors raised while reconciling and persisting collections.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Two observed entities of one batch share a natural key.
    #[error("ambiguous reference in {collection}: duplicate natural key {key}")]
    AmbiguousReference {
        collection: String,
        key: NaturalKey,
    },

    /// A write batch failed and was rolled back.
    #[error("batch {batch_index} of {collection} failed: {cause}")]
    BatchPersist {
        collection: String,
        batch_index: usize,
        #[source]
        cause: StoreError,
    },

    /// A collection read ids of another collection that has not completed yet.
    #[error("{collection} depends on {dependency}, which has not completed its pass")]
    DependencyOrderViolation {
        collection: String,
        dependency: String,
    },

    /// Missing records exist but the collection declares no retention policy.
    #[error("no retention policy declared for {collection}")]
    UnknownRetentionTarget { collection: String },

    /// A name that is not part of the inventory graph.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// Two descriptors registered under the same name.
    #[error("collection registered twice: {0}")]
    DuplicateCollection(String),

    /// Declared dependencies form a cycle.
    #[error("dependency cycle between collections: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// A dependency failed earlier in the same pass.
    #[error("{collection} skipped: dependency {dependency} did not complete")]
    DependencyFailed {
        collection: String,
        dependency: String,
    },

    /// A reference used as part of a natural key points at nothing.
    #[error("unresolved reference {attribute} in {collection}: no {target} with key {key}")]
    UnresolvedReference {
        collection: String,
        attribute: String,
        target: String,
        key: NaturalKey,
    },

    /// An observed attribute name cannot be stored.
    #[error("invalid attribute name {attribute:?} in {collection}")]
    InvalidAttribute { collection: String, attribute: String },

    /// A default-value generator could not produce its value.
    #[error("default value {attribute} of {collection}: {message}")]
    DefaultValue {
        collection: String,
        attribute: String,
        message: String,
    },

    /// Read failure outside a write batch.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InventoryError {
    /// Configuration and programming errors abort the whole pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InventoryError::DependencyOrderViolation { .. }
                | InventoryError::UnknownRetentionTarget { .. }
                | InventoryError::UnknownCollection(_)
                | InventoryError::DuplicateCollection(_)
                | InventoryError::DependencyCycle(_)
        )
    }

    /// Index of the failed write batch, if any.
    pub fn batch_index(&self) -> Option<usize> {
        match self {
            InventoryError::BatchPersist { batch_index, .. } => Some(*batch_index),
            _ => None,
        }
    }
}

/// Result type for refresh operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
