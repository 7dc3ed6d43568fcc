//! Entity references: natural keys, lazy references between collections
//! and the per-pass id indexes used to resolve them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{InventoryError, Result};

/// Surrogate id assigned by the store.
pub type RecordId = i64;

/// Attribute document of an entity.
pub type Attributes = BTreeMap<String, Value>;

/// One component of a natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl KeyPart {
    /// Map a JSON value onto a hashable key component.
    ///
    /// Non-integral numbers and structured values fall back to their JSON text.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => KeyPart::Int(i),
                None => KeyPart::Text(n.to_string()),
            },
            Value::String(s) => KeyPart::Text(s.clone()),
            other => KeyPart::Text(other.to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Null => Value::Null,
            KeyPart::Bool(b) => Value::Bool(*b),
            KeyPart::Int(i) => Value::from(*i),
            KeyPart::Text(s) => Value::String(s.clone()),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Text(s.to_string())
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

/// Ordered tuple identifying an entity within its collection (the manager ref).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(Vec<KeyPart>);

impl NaturalKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn single(part: impl Into<KeyPart>) -> Self {
        Self(vec![part.into()])
    }

    /// Build the key from the named attributes; absent attributes become null.
    pub fn from_attributes(manager_ref: &[String], attributes: &Attributes) -> Self {
        Self(
            manager_ref
                .iter()
                .map(|name| {
                    attributes
                        .get(name)
                        .map(KeyPart::from_value)
                        .unwrap_or(KeyPart::Null)
                })
                .collect(),
        )
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Text form stored in the `natural_key` column.
    pub fn to_column(&self) -> String {
        Value::Array(self.0.iter().map(KeyPart::to_value).collect()).to_string()
    }

    pub fn from_column(column: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(column)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_column())
    }
}

/// Reference to an entity of another collection, resolved to its surrogate id
/// once that collection has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LazyRef {
    #[serde(rename = "$ref")]
    pub collection: String,
    pub key: Vec<AttrValue>,
    /// Secondary key name (e.g. `by_name`) used instead of the natural key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl LazyRef {
    pub fn new(collection: impl Into<String>, key: Vec<Value>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into_iter().map(AttrValue::Plain).collect(),
            secondary: None,
        }
    }

    /// Reference whose key itself contains references.
    pub fn nested(collection: impl Into<String>, key: Vec<AttrValue>) -> Self {
        Self {
            collection: collection.into(),
            key,
            secondary: None,
        }
    }

    pub fn by_secondary(
        collection: impl Into<String>,
        secondary: impl Into<String>,
        key: Vec<Value>,
    ) -> Self {
        Self {
            secondary: Some(secondary.into()),
            ..Self::new(collection, key)
        }
    }

    pub(crate) fn collect<'a>(&'a self, out: &mut Vec<&'a LazyRef>) {
        out.push(self);
        for part in &self.key {
            if let AttrValue::Ref(inner) = part {
                inner.collect(out);
            }
        }
    }
}

/// Observed attribute value: a plain JSON value or a lazy reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Ref(LazyRef),
    Plain(Value),
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        AttrValue::Plain(value)
    }
}

impl From<LazyRef> for AttrValue {
    fn from(reference: LazyRef) -> Self {
        AttrValue::Ref(reference)
    }
}

/// Entity as produced by the collector for one provider-side object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservedEntity {
    attributes: BTreeMap<String, AttrValue>,
}

impl ObservedEntity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .insert(name.into(), AttrValue::Plain(value.into()));
        self
    }

    pub fn with_ref(mut self, name: impl Into<String>, reference: LazyRef) -> Self {
        self.attributes.insert(name.into(), AttrValue::Ref(reference));
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    /// Every lazy reference of this entity, nested ones included.
    pub fn references(&self) -> Vec<&LazyRef> {
        let mut out = Vec::new();
        for value in self.attributes.values() {
            if let AttrValue::Ref(reference) = value {
                reference.collect(&mut out);
            }
        }
        out
    }

    /// Replace references by surrogate ids and derive the natural key.
    ///
    /// A reference that is part of the natural key must resolve. Other
    /// unresolved references are stored as null.
    pub fn resolve(
        &self,
        collection: &str,
        manager_ref: &[String],
        ids: &AssignedIds,
    ) -> Result<ResolvedEntity> {
        let mut attributes = Attributes::new();
        let mut references = BTreeMap::new();

        for (name, value) in &self.attributes {
            // Double quotes end a JSON path label in the store.
            if name.contains('"') {
                return Err(InventoryError::InvalidAttribute {
                    collection: collection.to_string(),
                    attribute: name.clone(),
                });
            }
            match value {
                AttrValue::Plain(v) => {
                    attributes.insert(name.clone(), v.clone());
                }
                AttrValue::Ref(reference) => {
                    let id = ids.resolve(collection, reference)?;
                    if id.is_none() {
                        let key = ids.resolve_key(collection, &reference.key)?;
                        if manager_ref.contains(name) {
                            return Err(InventoryError::UnresolvedReference {
                                collection: collection.to_string(),
                                attribute: name.clone(),
                                target: reference.collection.clone(),
                                key,
                            });
                        }
                        warn!(
                            collection,
                            attribute = %name,
                            target = %reference.collection,
                            key = %key,
                            "Unresolved reference, storing null"
                        );
                    }
                    attributes.insert(name.clone(), id.map(Value::from).unwrap_or(Value::Null));
                    references.insert(name.clone(), id);
                }
            }
        }

        Ok(ResolvedEntity {
            key: NaturalKey::from_attributes(manager_ref, &attributes),
            attributes,
            references,
        })
    }
}

/// Observed entity with all references replaced by surrogate ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntity {
    pub key: NaturalKey,
    pub attributes: Attributes,
    /// Attributes that were references, with their resolved target.
    pub references: BTreeMap<String, Option<RecordId>>,
}

/// Natural-key and secondary-key lookup for one collection, built once per pass.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    primary: HashMap<NaturalKey, RecordId>,
    secondary: HashMap<String, HashMap<NaturalKey, RecordId>>,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: NaturalKey,
        id: RecordId,
        attributes: &Attributes,
        secondary_refs: &BTreeMap<String, Vec<String>>,
    ) {
        for (name, attrs) in secondary_refs {
            self.secondary
                .entry(name.clone())
                .or_default()
                .entry(NaturalKey::from_attributes(attrs, attributes))
                .or_insert(id);
        }
        self.primary.insert(key, id);
    }

    pub fn insert_key(&mut self, key: NaturalKey, id: RecordId) {
        self.primary.insert(key, id);
    }

    pub fn get(&self, key: &NaturalKey) -> Option<RecordId> {
        self.primary.get(key).copied()
    }

    pub fn get_secondary(&self, name: &str, key: &NaturalKey) -> Option<RecordId> {
        self.secondary.get(name).and_then(|idx| idx.get(key)).copied()
    }

    pub fn contains_key(&self, key: &NaturalKey) -> bool {
        self.primary.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    pub fn merge(&mut self, other: KeyIndex) {
        self.primary.extend(other.primary);
        for (name, idx) in other.secondary {
            self.secondary.entry(name).or_default().extend(idx);
        }
    }
}

/// Ids available to the collection currently being reconciled: completed
/// collections of this pass plus indexes loaded from the store.
#[derive(Debug, Default)]
pub struct AssignedIds {
    indexes: HashMap<String, KeyIndex>,
}

impl AssignedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.indexes.contains_key(collection)
    }

    pub fn index(&self, collection: &str) -> Option<&KeyIndex> {
        self.indexes.get(collection)
    }

    pub fn insert(&mut self, collection: impl Into<String>, index: KeyIndex) {
        self.indexes.insert(collection.into(), index);
    }

    pub fn merge(&mut self, collection: &str, index: KeyIndex) {
        self.indexes
            .entry(collection.to_string())
            .or_default()
            .merge(index);
    }

    /// Look up an id; `requester` is the collection asking, reported when the
    /// target collection is not available yet.
    pub fn find(
        &self,
        requester: &str,
        collection: &str,
        secondary: Option<&str>,
        key: &NaturalKey,
    ) -> Result<Option<RecordId>> {
        let index = self.indexes.get(collection).ok_or_else(|| {
            InventoryError::DependencyOrderViolation {
                collection: requester.to_string(),
                dependency: collection.to_string(),
            }
        })?;
        Ok(match secondary {
            None => index.get(key),
            Some(name) => index.get_secondary(name, key),
        })
    }

    pub fn resolve(&self, requester: &str, reference: &LazyRef) -> Result<Option<RecordId>> {
        let key = self.resolve_key(requester, &reference.key)?;
        self.find(
            requester,
            &reference.collection,
            reference.secondary.as_deref(),
            &key,
        )
    }

    /// Resolve key parts; an unresolved nested reference becomes null.
    pub fn resolve_key(&self, requester: &str, parts: &[AttrValue]) -> Result<NaturalKey> {
        parts
            .iter()
            .map(|part| match part {
                AttrValue::Plain(v) => Ok(KeyPart::from_value(v)),
                AttrValue::Ref(inner) => Ok(self
                    .resolve(requester, inner)?
                    .map(KeyPart::Int)
                    .unwrap_or(KeyPart::Null)),
            })
            .collect::<Result<Vec<_>>>()
            .map(NaturalKey::new)
    }
}
