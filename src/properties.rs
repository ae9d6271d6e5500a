//! Record and pointer types shared by every layer of the crate.
//!
//! A [Record] stores each relationship edge as a [ResourcePointer] inside a [Linkage]. The same
//! edge is stored again, pointing back, on the related record.

use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter},
};

use crate::error::TetherError;

/// The three relationship kinds a field can declare.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    HasMany,
    HasOne,
    BelongsTo,
}

impl Relation {
    pub fn all() -> &'static [Relation] {
        &[Relation::HasMany, Relation::HasOne, Relation::BelongsTo]
    }

    /// The keyword used for this relation in schema declarations.
    pub fn keyword(&self) -> &'static str {
        match self {
            Relation::HasMany => "hasMany",
            Relation::HasOne => "hasOne",
            Relation::BelongsTo => "belongsTo",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Relation> {
        Relation::all()
            .iter()
            .copied()
            .find(|relation| relation.keyword() == keyword)
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Relation::HasMany => Cardinality::Many,
            Relation::HasOne | Relation::BelongsTo => Cardinality::One,
        }
    }

    /// Relations that carry a singular pointer slot.
    pub fn singular() -> EnumSet<Relation> {
        Relation::HasOne | Relation::BelongsTo
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// Whether a relationship field stores one pointer or an array of pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// Embedded stand-in for a reference to another record.
///
/// `archived` mirrors the referenced record's soft-delete flag as of the last cascade. `related`
/// tracks whether this edge is active; deactivating an edge never touches `archived`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePointer {
    pub id: String,
    pub archived: bool,
    pub related: bool,
}

impl ResourcePointer {
    /// A fresh, active edge to `id`.
    pub fn new(id: impl Into<String>) -> ResourcePointer {
        ResourcePointer {
            id: id.into(),
            archived: false,
            related: true,
        }
    }

    pub fn archived(&self) -> ResourcePointer {
        ResourcePointer {
            archived: true,
            ..self.clone()
        }
    }

    pub fn deactivated(&self) -> ResourcePointer {
        ResourcePointer {
            related: false,
            ..self.clone()
        }
    }

    /// An active edge to a record that has not been archived.
    pub fn is_live(&self) -> bool {
        self.related && !self.archived
    }
}

/// The value stored under one relationship field.
///
/// Encoded as `null`, a pointer object or an array of pointers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    Many(Vec<ResourcePointer>),
    One(Option<ResourcePointer>),
}

impl Linkage {
    pub fn empty(cardinality: Cardinality) -> Linkage {
        match cardinality {
            Cardinality::One => Linkage::One(None),
            Cardinality::Many => Linkage::Many(Vec::new()),
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Linkage::One(_) => Cardinality::One,
            Linkage::Many(_) => Cardinality::Many,
        }
    }

    pub fn pointers(&self) -> &[ResourcePointer] {
        match self {
            Linkage::Many(pointers) => pointers.as_slice(),
            Linkage::One(Some(pointer)) => std::slice::from_ref(pointer),
            Linkage::One(None) => &[],
        }
    }

    pub fn get(&self, id: &str) -> Option<&ResourcePointer> {
        self.pointers().iter().find(|pointer| pointer.id == id)
    }

    /// Ids of the active edges, in stored order.
    pub fn related_ids(&self) -> Vec<String> {
        self.pointers()
            .iter()
            .filter(|pointer| pointer.related)
            .map(|pointer| pointer.id.clone())
            .collect()
    }

    /// Point at `id` with a fresh pointer. A singular slot is replaced; an array has the element
    /// with the same id replaced in place, or gets the pointer appended.
    pub fn link(&mut self, id: &str) {
        match self {
            Linkage::One(slot) => *slot = Some(ResourcePointer::new(id)),
            Linkage::Many(pointers) => match pointers.iter_mut().find(|p| p.id == id) {
                Some(existing) => *existing = ResourcePointer::new(id),
                None => pointers.push(ResourcePointer::new(id)),
            },
        }
    }

    /// Rewrite every pointer whose id is in `targets`, leaving the others untouched.
    pub fn edit<F>(&mut self, targets: &BTreeSet<String>, edit: F)
    where
        F: Fn(&ResourcePointer) -> ResourcePointer,
    {
        match self {
            Linkage::One(Some(pointer)) if targets.contains(&pointer.id) => {
                *pointer = edit(pointer);
            }
            Linkage::One(_) => {}
            Linkage::Many(pointers) => {
                for pointer in pointers.iter_mut() {
                    if targets.contains(&pointer.id) {
                        *pointer = edit(pointer);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub archived: bool,
}

/// A document as held by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: BTreeMap<String, Linkage>,
    #[serde(default)]
    pub meta: RecordMeta,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Record {
        Record {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Record {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_linkage(mut self, field: &str, linkage: Linkage) -> Record {
        self.relationships.insert(field.to_string(), linkage);
        self
    }

    pub fn is_archived(&self) -> bool {
        self.meta.archived
    }

    pub fn linkage(&self, field: &str) -> Option<&Linkage> {
        self.relationships.get(field)
    }

    /// The linkage stored under `field`, created empty when absent. Fails when the stored shape
    /// disagrees with `cardinality`.
    pub fn linkage_mut(
        &mut self,
        field: &str,
        cardinality: Cardinality,
    ) -> Result<&mut Linkage, TetherError> {
        let linkage = self
            .relationships
            .entry(field.to_string())
            .or_insert_with(|| Linkage::empty(cardinality));
        if linkage.cardinality() != cardinality {
            return Err(TetherError::Store(format!(
                "record '{}' stores field '{}' as {:?} but {:?} was expected",
                self.id,
                field,
                linkage.cardinality(),
                cardinality
            )));
        }
        Ok(linkage)
    }

    /// Shallow merge of `patch` into the attributes. A `null` value removes the key.
    pub fn merge_attributes(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch.iter() {
            if value.is_null() {
                self.attributes.remove(key);
            } else {
                self.attributes.insert(key.clone(), value.clone());
            }
        }
    }
}
