//! # tether-core
//!
//! Relationship consistency over a schema-less document store.
//!
//! Documents carry their foreign references as embedded resource pointers (`{id, archived,
//! related}`), stored on both sides of every relationship. tether-core keeps the two sides in
//! agreement: every edit to one side is written together with the matching edit to the other in a
//! single atomic batch, and archiving a record cascades through the records it owns while flagging
//! the pointers held by records it merely references.
//!
//! ## Architecture
//!
//! - **[`schema`]**: Table declarations and the resolved descriptor [`schema::Registry`]
//! - **[`properties`]**: Relation kinds, resource pointers, linkages and records
//! - **[`cascade`]**: Archive classification, cascade building and execution
//! - **[`mutation`]**: `put`, `remove`, `push` and `splice`
//! - **[`compliance`]**: Pre-write validation of relationship edits
//! - **[`store`]**: The [`store::DocumentStore`] contract and an in-memory store
//! - **[`context`]**: [`context::Tether`], the entry point tying it all together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether_core::{config::TetherConfig, context::Tether, store::MemoryStore};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: TetherConfig = r#"
//!         [tables.user.relationships.friends]
//!         hasMany = "user"
//!         inverse = "friends"
//!     "#
//!     .parse()?;
//!     let tether = Tether::new(config.registry()?, MemoryStore::new());
//!
//!     tether.create("user", Some("1".into()), Default::default()).await?;
//!     tether.create("user", Some("3".into()), Default::default()).await?;
//!     let user = tether.push("user", "1", "friends", "3").await?;
//!     println!("{:?}", user.linkage("friends"));
//!
//!     tether.archive("user", "3").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `service`: SQLite-backed [`db::DbConnection`] store (via `sqlx`)
//! - `bin`: the `tether` command-line tool

pub mod cascade;
pub mod compliance;
pub mod config;
pub mod context;
#[cfg(feature = "service")]
pub mod db;
pub mod error;
pub mod event;
pub mod mutation;
pub mod node;
pub mod properties;
pub mod schema;
pub mod store;

pub use error::*;
