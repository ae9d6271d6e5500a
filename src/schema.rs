// Relationship descriptor registry
//
// Table declarations name each relationship field with exactly one relation keyword and the
// inverse field on the related table. The registry resolves every declaration against its
// inverse once, at startup, and is read-only afterwards.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    error::TetherError,
    properties::{Cardinality, Relation},
};

/// Key naming the inverse field inside a relationship declaration.
pub const INVERSE_KEY: &str = "inverse";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Declared relationships of one table, as written in configuration:
///
/// ```toml
/// [tables.user.relationships.friends]
/// hasMany = "user"
/// inverse = "friends"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDeclaration {
    #[serde(default)]
    pub relationships: BTreeMap<String, BTreeMap<String, String>>,
}

impl TableDeclaration {
    pub fn relationship(
        mut self,
        field: &str,
        relation: Relation,
        related_table: &str,
        inverse_field: &str,
    ) -> TableDeclaration {
        let entry = BTreeMap::from([
            (relation.keyword().to_string(), related_table.to_string()),
            (INVERSE_KEY.to_string(), inverse_field.to_string()),
        ]);
        self.relationships.insert(field.to_string(), entry);
        self
    }
}

pub type SchemaDeclaration = BTreeMap<String, TableDeclaration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InverseDescriptor {
    pub field: String,
    pub relation: Relation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    pub field: String,
    pub related_table: String,
    pub relation: Relation,
    pub inverse: InverseDescriptor,
}

impl RelationshipDescriptor {
    pub fn cardinality(&self) -> Cardinality {
        self.relation.cardinality()
    }

    pub fn inverse_cardinality(&self) -> Cardinality {
        self.inverse.relation.cardinality()
    }
}

// One declaration entry before its inverse is resolved.
struct DeclaredField {
    relation: Relation,
    related_table: String,
    inverse_field: String,
}

fn check_identifier(kind: &str, name: &str) -> Result<(), TetherError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(TetherError::Configuration(format!(
            "{kind} name '{name}' is not a valid identifier"
        )))
    }
}

fn parse_entry(
    table: &str,
    field: &str,
    entry: &BTreeMap<String, String>,
) -> Result<DeclaredField, TetherError> {
    let mut relation = None;
    let mut inverse_field = None;
    for (key, value) in entry.iter() {
        if key == INVERSE_KEY {
            inverse_field = Some(value.clone());
            continue;
        }
        let Some(kind) = Relation::from_keyword(key) else {
            return Err(TetherError::Configuration(format!(
                "{table}.{field}: unknown relationship key '{key}'"
            )));
        };
        if relation.is_some() {
            return Err(TetherError::Configuration(format!(
                "{table}.{field}: declares more than one relation kind"
            )));
        }
        relation = Some((kind, value.clone()));
    }

    let Some((relation, related_table)) = relation else {
        return Err(TetherError::Configuration(format!(
            "{table}.{field}: missing relation kind (expected one of hasMany, hasOne, belongsTo)"
        )));
    };
    let Some(inverse_field) = inverse_field else {
        return Err(TetherError::Configuration(format!(
            "{table}.{field}: missing '{INVERSE_KEY}' field"
        )));
    };
    Ok(DeclaredField {
        relation,
        related_table,
        inverse_field,
    })
}

/// Resolved relationship descriptors for every declared table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    tables: BTreeMap<String, BTreeMap<String, RelationshipDescriptor>>,
}

impl Registry {
    /// Resolve every declaration against its inverse. Any inconsistency is a configuration error;
    /// a registry is never partially built.
    pub fn build(declaration: &SchemaDeclaration) -> Result<Registry, TetherError> {
        let mut declared: BTreeMap<&str, BTreeMap<&str, DeclaredField>> = BTreeMap::new();
        for (table, table_decl) in declaration.iter() {
            check_identifier("table", table)?;
            let fields = declared.entry(table.as_str()).or_default();
            for (field, entry) in table_decl.relationships.iter() {
                check_identifier("field", field)?;
                fields.insert(field.as_str(), parse_entry(table, field, entry)?);
            }
        }

        let mut tables = BTreeMap::new();
        for (table, fields) in declared.iter() {
            let mut descriptors = BTreeMap::new();
            for (field, decl) in fields.iter() {
                let Some(related_fields) = declared.get(decl.related_table.as_str()) else {
                    return Err(TetherError::Configuration(format!(
                        "{table}.{field}: related table '{}' is not declared",
                        decl.related_table
                    )));
                };
                let Some(inverse) = related_fields.get(decl.inverse_field.as_str()) else {
                    return Err(TetherError::Configuration(format!(
                        "{table}.{field}: inverse field '{}.{}' does not exist",
                        decl.related_table, decl.inverse_field
                    )));
                };
                if inverse.related_table != *table || inverse.inverse_field != *field {
                    return Err(TetherError::Configuration(format!(
                        "{table}.{field}: inverse '{}.{}' points back to '{}.{}'",
                        decl.related_table,
                        decl.inverse_field,
                        inverse.related_table,
                        inverse.inverse_field
                    )));
                }
                if decl.relation == Relation::BelongsTo && inverse.relation == Relation::BelongsTo
                {
                    return Err(TetherError::Configuration(format!(
                        "{table}.{field}: belongsTo cannot be paired with another belongsTo"
                    )));
                }
                descriptors.insert(
                    field.to_string(),
                    RelationshipDescriptor {
                        field: field.to_string(),
                        related_table: decl.related_table.clone(),
                        relation: decl.relation,
                        inverse: InverseDescriptor {
                            field: decl.inverse_field.clone(),
                            relation: inverse.relation,
                        },
                    },
                );
            }
            tables.insert(table.to_string(), descriptors);
        }

        tracing::debug!(
            "[Registry::build] Resolved {} tables, {} relationships",
            tables.len(),
            tables.values().map(BTreeMap::len).sum::<usize>()
        );
        Ok(Registry { tables })
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Every relationship declared on `table`, keyed by field.
    pub fn describe(
        &self,
        table: &str,
    ) -> Result<&BTreeMap<String, RelationshipDescriptor>, TetherError> {
        self.tables
            .get(table)
            .ok_or_else(|| TetherError::Configuration(format!("unknown table '{table}'")))
    }

    pub fn descriptor(
        &self,
        table: &str,
        field: &str,
    ) -> Result<&RelationshipDescriptor, TetherError> {
        self.describe(table)?.get(field).ok_or_else(|| {
            TetherError::Configuration(format!("'{table}.{field}' is not a declared relationship"))
        })
    }

    /// The descriptor of the field on the related table that mirrors `table.field`.
    pub fn inverse_of(
        &self,
        table: &str,
        field: &str,
    ) -> Result<&RelationshipDescriptor, TetherError> {
        let descriptor = self.descriptor(table, field)?;
        self.descriptor(&descriptor.related_table, &descriptor.inverse.field)
    }
}
