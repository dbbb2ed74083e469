//! # pg-json-edit
//!
//! Edit a live PostgreSQL database as a hierarchical JSON document:
//!
//! - **Dump** the database to JSON, nested along cascading foreign keys
//!   (plus a flat base snapshot for later three-way merging).
//! - **Edit** the JSON in any editor, with a generated JSON-schema
//!   companion for autocomplete.
//! - **Sync** the edits back as parameterized SQL inside one transaction,
//!   diffing against the base snapshot so concurrent database changes
//!   survive. **Reset** force-matches the database to the file instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use pg_json_edit::{ConnectOptions, DumpOptions, PgDriver, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> pg_json_edit::Result<()> {
//!     let options = ConnectOptions::new("postgres://postgres@localhost/app");
//!     let driver = Arc::new(PgDriver::connect(&options).await?);
//!     let engine = SyncEngine::new(driver);
//!
//!     engine.dump(&DumpOptions::new("app.json")).await?;
//!     // ... edit app.json ...
//!     let report = engine.sync(Path::new("app.json")).await?;
//!     println!("applied {} changes", report.total());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dataset;
pub mod diff;
pub mod driver;
pub mod emit;
pub mod error;
pub mod fetch;
pub mod file;
pub mod flatten;
pub mod jsonschema;
pub mod nest;
pub mod order;
pub mod schema;
pub mod sync;
pub mod tree;

// Re-exports for convenient access
pub use config::ConnectOptions;
pub use dataset::{FlatDataset, FlatRow, NestedDataset};
pub use diff::{diff, Change, ChangeSet};
pub use driver::{ColumnKind, Driver, PgDriver, SqlParam};
pub use emit::{emit, Statement};
pub use error::{Result, SyncError};
pub use fetch::{fetch_dataset, FetchOptions};
pub use file::{Document, Layout};
pub use flatten::flatten;
pub use nest::{nest, NestOptions};
pub use order::{order_changes, topo_order};
pub use schema::{extract_schema, Column, FkAction, Relationship, Schema, Table};
pub use sync::{ApplyReport, DumpOptions, DumpReport, SyncEngine};
pub use tree::{OwnershipEdge, OwnershipTree, RelationshipKind};
