//! Cross-links: read-only resolution of references against records that were
//! persisted by any source of the same tenant.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::collection::CollectionDescriptor;
use crate::error::Result;
use crate::reference::{KeyIndex, NaturalKey};
use crate::store::{InventoryStore, Scope};

/// Resolves keys of a `DiffAgainstReferencedOnly` collection to record ids.
pub struct CrossLinkResolver<'a> {
    store: &'a dyn InventoryStore,
    /// Key values bound per lookup query.
    batch_size: usize,
}

impl<'a> CrossLinkResolver<'a> {
    pub fn new(store: &'a dyn InventoryStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Look up the records matching `keys` within the tenant.
    ///
    /// Only the referenced keys are queried. When several sources hold a
    /// record with the same key the lowest id wins.
    pub async fn resolve(
        &self,
        descriptor: &CollectionDescriptor,
        tenant_id: i64,
        keys: &[NaturalKey],
    ) -> Result<KeyIndex> {
        let mut index = KeyIndex::new();
        if keys.is_empty() {
            return Ok(index);
        }

        let wanted: HashSet<&NaturalKey> = keys.iter().collect();
        let manager_ref = descriptor.manager_ref();
        let first_parts: Vec<_> = keys
            .iter()
            .filter_map(|k| k.parts().first())
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|p| p.to_value())
            .collect();

        let scope = Scope {
            tenant_id,
            source_id: None,
        };
        // All candidates of one key share its first part, so they land in the same chunk.
        for chunk in first_parts.chunks(self.batch_size) {
            let query = scope
                .query(descriptor.model())
                .any_source()
                .filter(manager_ref[0].clone(), chunk.to_vec());

            for record in self.store.load_records(&query).await? {
                let key = NaturalKey::from_attributes(manager_ref, &record.attributes);
                if !wanted.contains(&key) {
                    continue;
                }
                if let Some(existing) = index.get(&key) {
                    warn!(
                        collection = descriptor.name(),
                        key = %key,
                        kept = existing,
                        ignored = record.id,
                        "Cross-link key matches several records"
                    );
                    continue;
                }
                index.insert_key(key, record.id);
            }
        }

        debug!(
            collection = descriptor.name(),
            requested = wanted.len(),
            resolved = index.len(),
            "Resolved cross-links"
        );
        Ok(index)
    }
}
