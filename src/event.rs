use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::UnboundedSender;

/// A committed change, emitted after its batch succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationEvent {
    /// Root table, root id, records archived, fields patched
    Archived {
        table: String,
        id: String,
        records: usize,
        patches: usize,
    },
    /// Table, id, field, newly linked ids
    Linked {
        table: String,
        id: String,
        field: String,
        targets: Vec<String>,
    },
    /// Table, id, field, deactivated ids
    Unlinked {
        table: String,
        id: String,
        field: String,
        targets: Vec<String>,
    },
}

impl RelationEvent {
    /// The `(table, id)` the operation was invoked on.
    pub fn subject(&self) -> (&str, &str) {
        match self {
            RelationEvent::Archived { table, id, .. }
            | RelationEvent::Linked { table, id, .. }
            | RelationEvent::Unlinked { table, id, .. } => (table, id),
        }
    }
}

impl Display for RelationEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RelationEvent::Archived {
                table,
                id,
                records,
                patches,
            } => write!(
                f,
                "Archived({table}/{id}: {records} records, {patches} patches)"
            ),
            RelationEvent::Linked {
                table, id, field, ..
            } => write!(f, "Linked({table}/{id}.{field})"),
            RelationEvent::Unlinked {
                table, id, field, ..
            } => write!(f, "Unlinked({table}/{id}.{field})"),
        }
    }
}

/// Send `event` if anyone listens. The batch it describes is already committed, so a closed
/// channel is only logged.
pub(crate) fn emit(tx: Option<&UnboundedSender<RelationEvent>>, event: RelationEvent) {
    let Some(tx) = tx else {
        return;
    };
    if let Err(e) = tx.send(event) {
        tracing::warn!(
            "Channel update send Error, could not transmit relation event {}",
            e.0
        );
    }
}
