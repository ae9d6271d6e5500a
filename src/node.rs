//! Record handles and the accepted shapes of mutation input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::{error::TetherError, properties::Record};

/// A fetched record together with the table it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub table: String,
    pub record: Record,
}

impl Node {
    pub fn new(table: impl Into<String>, record: Record) -> Node {
        Node {
            table: table.into(),
            record,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// What a relationship mutation points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(String),
    Ids(Vec<String>),
    Ref(Node),
    Refs(Vec<Node>),
}

impl Target {
    /// Parse client JSON: an id string, an array of id strings, an object with an `id`, an array
    /// of such objects, or a connection (`{"nodes": [..]}` or `{"edges": [{"node": ..}]}`).
    pub fn from_json(value: &Value) -> Result<Target, TetherError> {
        match value {
            Value::String(id) => Ok(Target::Id(id.clone())),
            Value::Array(items) => items
                .iter()
                .map(json_id)
                .collect::<Result<Vec<String>, TetherError>>()
                .map(Target::Ids),
            Value::Object(map) => {
                if map.contains_key("id") {
                    return json_id(value).map(Target::Id);
                }
                if let Some(Value::Array(nodes)) = map.get("nodes") {
                    return nodes
                        .iter()
                        .map(json_id)
                        .collect::<Result<Vec<String>, TetherError>>()
                        .map(Target::Ids);
                }
                if let Some(Value::Array(edges)) = map.get("edges") {
                    return edges
                        .iter()
                        .map(|edge| match edge.get("node") {
                            Some(node) => json_id(node),
                            None => Err(TetherError::InvalidInput(
                                "connection edge without a node".to_string(),
                            )),
                        })
                        .collect::<Result<Vec<String>, TetherError>>()
                        .map(Target::Ids);
                }
                Err(TetherError::InvalidInput(
                    "object is neither a record nor a connection".to_string(),
                ))
            }
            other => Err(TetherError::InvalidInput(format!(
                "expected id(s) or node(s), found {other}"
            ))),
        }
    }

    /// Normalize to distinct ids in input order. Nodes must belong to `related_table`.
    pub fn into_ids(self, related_table: &str) -> Result<Vec<String>, TetherError> {
        let ids = match self {
            Target::Id(id) => vec![id],
            Target::Ids(ids) => ids,
            Target::Ref(node) => vec![node_id(node, related_table)?],
            Target::Refs(nodes) => nodes
                .into_iter()
                .map(|node| node_id(node, related_table))
                .collect::<Result<Vec<String>, TetherError>>()?,
        };
        if ids.is_empty() {
            return Err(TetherError::InvalidInput("no ids given".to_string()));
        }
        let mut seen = BTreeSet::new();
        let mut distinct = Vec::with_capacity(ids.len());
        for id in ids.into_iter() {
            if id.is_empty() {
                return Err(TetherError::InvalidInput("empty id".to_string()));
            }
            if seen.insert(id.clone()) {
                distinct.push(id);
            }
        }
        Ok(distinct)
    }
}

fn json_id(value: &Value) -> Result<String, TetherError> {
    match value {
        Value::String(id) => Ok(id.clone()),
        Value::Object(map) => match map.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            _ => Err(TetherError::InvalidInput(
                "record object without a string id".to_string(),
            )),
        },
        other => Err(TetherError::InvalidInput(format!(
            "expected an id or a record, found {other}"
        ))),
    }
}

fn node_id(node: Node, related_table: &str) -> Result<String, TetherError> {
    if node.table != related_table {
        return Err(TetherError::InvalidInput(format!(
            "node {}/{} is not a '{related_table}' record",
            node.table,
            node.id()
        )));
    }
    Ok(node.record.id)
}

impl From<&str> for Target {
    fn from(id: &str) -> Self {
        Target::Id(id.to_string())
    }
}

impl From<String> for Target {
    fn from(id: String) -> Self {
        Target::Id(id)
    }
}

impl From<Vec<String>> for Target {
    fn from(ids: Vec<String>) -> Self {
        Target::Ids(ids)
    }
}

impl From<&[&str]> for Target {
    fn from(ids: &[&str]) -> Self {
        Target::Ids(ids.iter().map(|id| id.to_string()).collect())
    }
}

impl From<Node> for Target {
    fn from(node: Node) -> Self {
        Target::Ref(node)
    }
}

impl From<Vec<Node>> for Target {
    fn from(nodes: Vec<Node>) -> Self {
        Target::Refs(nodes)
    }
}
