//! # docshift
//!
//! Schema drift detection and versioned migrations for document databases.
//!
//! Model files are parsed for their schema declarations, compared against
//! the last saved snapshot, and the difference becomes a numbered migration
//! unit (`001_create_widget.json`, `002_add_price_to_widget.json`, ...).
//! Units are applied in order and recorded in the `_migrations` collection
//! so that each one runs at most once.
//!
//! ```text
//! models/*.js ──extract──▶ Snapshot ──diff──▶ SchemaDiff ──generate──▶ MigrationUnit
//!                                                                        │
//!                                      _migrations ◀──record── Migrator ◀┘
//! ```
//!
//! - [`schema`]: model parsing, snapshots and diffing
//! - [`snapshot`]: timestamped snapshot files
//! - [`migrate`]: unit files, generation, registry, lock and runner
//! - [`store`]: the [`store::DocumentStore`] backends
//! - [`workspace`]: file-side operations used by the CLI

pub mod cli;
pub mod config;
pub mod error;
pub mod migrate;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod workspace;

pub use error::{MigrateError, Result};

/// Common imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{MigrateError, Result};
    pub use crate::migrate::{DownOutcome, MigrationUnit, Migrator, Operation, StatusReport, UpOutcome};
    pub use crate::schema::{FieldDescriptor, IndexDescriptor, SchemaDescriptor, SchemaDiff, Snapshot};
    pub use crate::store::{Database, DocumentStore};
    pub use crate::workspace::{GenerateOutcome, Workspace};
}
