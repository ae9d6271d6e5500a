use serde::{Deserialize, Serialize};

use crate::{properties::Relation, schema::RelationshipDescriptor};

/// What archiving a record means for the records one of its fields points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// The related records are owned by this one and are archived with it.
    Archive,
    /// The related records stay alive; only their pointer back to this record is flagged.
    Patch,
}

/// Only a relationship whose inverse is `belongsTo` owns the records on the other side.
pub fn classify(relation: Relation, inverse: Relation) -> Action {
    match (relation, inverse) {
        (Relation::HasOne | Relation::HasMany, Relation::BelongsTo) => Action::Archive,
        _ => Action::Patch,
    }
}

pub fn classify_descriptor(descriptor: &RelationshipDescriptor) -> Action {
    classify(descriptor.relation, descriptor.inverse.relation)
}
