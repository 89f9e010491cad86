//! Versioned migrations: unit files, generation, registry and execution.
//!
//! [`Migrator`] is the single runner used by the CLI and by in-process
//! callers:
//!
//! ```no_run
//! # async fn run() -> docshift::Result<()> {
//! use docshift::migrate::{Migrator, UpOutcome};
//! use docshift::store::Database;
//!
//! let db = Database::new(Some("jsondb://./data".to_string()));
//! let migrator = Migrator::new(db, "migrations").executed_by("deploy");
//! if let UpOutcome::Applied(units) = migrator.up().await? {
//!     println!("applied {} migration(s)", units.len());
//! }
//! # Ok(())
//! # }
//! ```

mod generate;
mod lock;
mod registry;
mod runner;
mod unit;

pub use generate::{fill_value, generate, zero_value};
pub use lock::{DEFAULT_LOCK_TTL, LOCK_COLLECTION, LockGuard, MigrationLock};
pub use registry::{MigrationRecord, MigrationStatus, REGISTRY_COLLECTION, Registry};
pub use runner::{
    AppliedUnit, DownOutcome, Migrator, PendingUnit, Progress, StatusReport, UpOutcome,
    execute_operation,
};
pub use unit::{
    LoadedUnit, MigrationUnit, Operation, format_version, load_units, next_version, parse_version,
    sanitize_name, write_unit,
};
