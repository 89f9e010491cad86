//! Migration runner: applies pending units, rolls back the latest one and
//! reports status.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use super::lock::{DEFAULT_LOCK_TTL, MigrationLock};
use super::registry::{MigrationRecord, MigrationStatus, Registry};
use super::unit::{LoadedUnit, Operation, load_units};
use crate::error::{MigrateError, Result};
use crate::schema::{IndexDescriptor, IndexOptions, is_clock_expr};
use crate::store::{Database, DocumentStore, IndexSpec, StoreResult};

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Applying {
        version: String,
        name: String,
        destructive: bool,
    },
    Applied {
        version: String,
        elapsed_ms: u64,
    },
    Failed {
        version: String,
        error: String,
    },
    RollingBack {
        version: String,
        name: String,
    },
    /// A `note` operation; `manual` ones need a human.
    Note {
        version: String,
        message: String,
        manual: bool,
    },
}

type Observer = Arc<dyn Fn(&Progress) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUnit {
    pub version: String,
    pub name: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpOutcome {
    NothingPending,
    Applied(Vec<AppliedUnit>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownOutcome {
    NothingToRollBack,
    /// The latest unit has no `down`; nothing was changed.
    NoDown { version: String },
    RolledBack { version: String, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingUnit {
    pub version: String,
    pub name: String,
}

/// Disjoint completed, pending and failed lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub completed: Vec<MigrationRecord>,
    pub pending: Vec<PendingUnit>,
    pub failed: Vec<MigrationRecord>,
    /// Completed versions whose file changed after they were applied.
    pub modified: Vec<String>,
}

impl StatusReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.pending.is_empty() && self.failed.is_empty()
    }
}

/// Runs migration units from a directory against a database.
pub struct Migrator {
    db: Database,
    migrations_dir: PathBuf,
    executed_by: String,
    lock_ttl: Duration,
    observer: Option<Observer>,
}

impl Migrator {
    pub fn new(db: Database, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            migrations_dir: migrations_dir.into(),
            executed_by: "unknown".to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            observer: None,
        }
    }

    pub fn executed_by(mut self, who: impl Into<String>) -> Self {
        self.executed_by = who.into();
        self
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn on_progress(mut self, observer: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    fn emit(&self, event: Progress) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    /// Apply every pending unit in version order, stopping at the first
    /// failure.
    pub async fn up(&self) -> Result<UpOutcome> {
        let store = self.db.store().await?;
        let guard = MigrationLock::new(Arc::clone(&store), self.lock_ttl)
            .acquire(&self.executed_by)
            .await?;
        let outcome = self.up_locked(store).await;
        let released = guard.release().await;
        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    async fn up_locked(&self, store: Arc<dyn DocumentStore>) -> Result<UpOutcome> {
        let units = load_units(&self.migrations_dir)?;
        let registry = Registry::new(Arc::clone(&store));
        let completed = registry.completed_versions().await?;

        let pending: Vec<LoadedUnit> = units
            .into_iter()
            .filter(|u| !completed.contains(&u.unit.version))
            .collect();
        if pending.is_empty() {
            tracing::info!("no pending migrations");
            return Ok(UpOutcome::NothingPending);
        }

        registry.ensure_index().await?;

        let mut applied = Vec::new();
        for loaded in pending {
            applied.push(self.apply(store.as_ref(), &registry, loaded).await?);
        }
        Ok(UpOutcome::Applied(applied))
    }

    async fn apply(
        &self,
        store: &dyn DocumentStore,
        registry: &Registry,
        loaded: LoadedUnit,
    ) -> Result<AppliedUnit> {
        let unit = &loaded.unit;
        self.emit(Progress::Applying {
            version: unit.version.clone(),
            name: unit.name.clone(),
            destructive: unit.destructive,
        });
        if unit.destructive {
            tracing::warn!(version = %unit.version, "applying destructive migration; removed data cannot be restored by its down");
        }

        let mut record = MigrationRecord {
            version: unit.version.clone(),
            name: unit.name.clone(),
            description: unit.description.clone(),
            applied_at: Utc::now(),
            executed_by: self.executed_by.clone(),
            execution_time_ms: None,
            status: MigrationStatus::Running,
            error: None,
            rollback_version: unit.down.as_ref().map(|_| unit.version.clone()),
            checksum: Some(loaded.checksum.clone()),
        };
        registry.record(&record).await?;

        let started = Instant::now();
        let result = self.execute(store, &unit.version, &unit.up).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        record.execution_time_ms = Some(elapsed_ms);
        record.applied_at = Utc::now();

        match result {
            Ok(()) => {
                record.status = MigrationStatus::Completed;
                registry.record(&record).await?;
                tracing::info!(version = %unit.version, elapsed_ms, "migration completed");
                self.emit(Progress::Applied {
                    version: unit.version.clone(),
                    elapsed_ms,
                });
                Ok(AppliedUnit {
                    version: unit.version.clone(),
                    name: unit.name.clone(),
                    elapsed_ms,
                })
            }
            Err(source) => {
                record.status = MigrationStatus::Failed;
                record.error = Some(source.to_string());
                registry.record(&record).await?;
                tracing::error!(version = %unit.version, error = %source, "migration failed");
                self.emit(Progress::Failed {
                    version: unit.version.clone(),
                    error: source.to_string(),
                });
                Err(MigrateError::Execution {
                    version: unit.version.clone(),
                    source,
                })
            }
        }
    }

    /// Revert the completed unit with the most recent `appliedAt`.
    pub async fn down(&self) -> Result<DownOutcome> {
        let store = self.db.store().await?;
        let guard = MigrationLock::new(Arc::clone(&store), self.lock_ttl)
            .acquire(&self.executed_by)
            .await?;
        let outcome = self.down_locked(store).await;
        let released = guard.release().await;
        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    async fn down_locked(&self, store: Arc<dyn DocumentStore>) -> Result<DownOutcome> {
        let registry = Registry::new(Arc::clone(&store));
        let Some(latest) = registry.latest_completed().await? else {
            return Ok(DownOutcome::NothingToRollBack);
        };

        let loaded = load_units(&self.migrations_dir)?
            .into_iter()
            .find(|u| u.unit.version == latest.version)
            .ok_or_else(|| MigrateError::UnitNotFound(latest.version.clone()))?;
        let unit = loaded.unit;

        let Some(down) = &unit.down else {
            tracing::warn!(version = %unit.version, "migration has no down; nothing rolled back");
            return Ok(DownOutcome::NoDown {
                version: unit.version.clone(),
            });
        };

        self.emit(Progress::RollingBack {
            version: unit.version.clone(),
            name: unit.name.clone(),
        });
        self.execute(store.as_ref(), &unit.version, down)
            .await
            .map_err(|source| MigrateError::Execution {
                version: unit.version.clone(),
                source,
            })?;
        registry.remove(&unit.version).await?;

        tracing::info!(version = %unit.version, "migration rolled back");
        Ok(DownOutcome::RolledBack {
            version: unit.version,
            name: unit.name,
        })
    }

    /// Completed, pending and failed units. Read-only.
    pub async fn status(&self) -> Result<StatusReport> {
        let units = load_units(&self.migrations_dir)?;
        let store = self.db.store().await?;
        let records = Registry::new(store).records().await?;

        let mut report = StatusReport::default();
        for record in records {
            match record.status {
                MigrationStatus::Completed => {
                    let on_disk = units.iter().find(|u| u.unit.version == record.version);
                    if let (Some(loaded), Some(checksum)) = (on_disk, &record.checksum) {
                        if &loaded.checksum != checksum {
                            report.modified.push(record.version.clone());
                        }
                    }
                    report.completed.push(record);
                }
                MigrationStatus::Failed => report.failed.push(record),
                MigrationStatus::Pending | MigrationStatus::Running => {}
            }
        }

        report.pending = units
            .iter()
            .filter(|u| {
                let v = &u.unit.version;
                !report.completed.iter().any(|r| &r.version == v)
                    && !report.failed.iter().any(|r| &r.version == v)
            })
            .map(|u| PendingUnit {
                version: u.unit.version.clone(),
                name: u.unit.name.clone(),
            })
            .collect();

        Ok(report)
    }

    async fn execute(&self, store: &dyn DocumentStore, version: &str, operations: &[Operation]) -> StoreResult<()> {
        for operation in operations {
            if let Operation::Note { message, manual } = operation {
                self.emit(Progress::Note {
                    version: version.to_string(),
                    message: message.clone(),
                    manual: *manual,
                });
            }
            execute_operation(store, operation).await?;
        }
        Ok(())
    }
}

/// Replace `{"$expr": "now"}` with the current time, as epoch milliseconds
/// when tagged `"as": "number"`.
fn resolve_value(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    let as_number = match (map.len(), map.get("as")) {
        (1, None) => false,
        (2, Some(Value::String(kind))) if kind == "number" => true,
        _ => return value.clone(),
    };
    match map.get("$expr") {
        Some(Value::String(expr)) if is_clock_expr(expr) => {
            let now = Utc::now();
            if as_number {
                Value::from(now.timestamp_millis())
            } else {
                Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
        _ => value.clone(),
    }
}

/// Run one operation. Every operation is safe to repeat.
pub async fn execute_operation(store: &dyn DocumentStore, operation: &Operation) -> StoreResult<()> {
    tracing::debug!(backend = store.backend(), "{}", operation);
    match operation {
        Operation::SetMissing { collection, field, value } => {
            let changed = store
                .set_where_missing(collection, field, &resolve_value(value))
                .await?;
            tracing::info!(collection = %collection, field = %field, changed, "set missing field");
        }
        Operation::UnsetField { collection, field } => {
            let changed = store.unset_field(collection, field).await?;
            tracing::info!(collection = %collection, field = %field, changed, "unset field");
        }
        Operation::RenameField { collection, from, to } => {
            let changed = store.rename_field(collection, from, to).await?;
            tracing::info!(collection = %collection, from = %from, to = %to, changed, "renamed field");
        }
        Operation::CreateIndex { collection, index } => {
            store.create_index(collection, &IndexSpec::from(index)).await?;
        }
        Operation::DropIndex { collection, index } => {
            let existing = store.list_indexes(collection).await?;
            let found = existing.iter().find(|spec| {
                IndexDescriptor {
                    fields: spec.keys.clone(),
                    options: IndexOptions { unique: spec.unique },
                }
                .signature()
                    == index.signature()
            });
            match found {
                Some(spec) => {
                    store.drop_index(collection, &spec.name).await?;
                }
                None => tracing::debug!(collection = %collection, "index already absent"),
            }
        }
        Operation::DropCollection { collection } => {
            let dropped = store.drop_collection(collection).await?;
            tracing::warn!(collection = %collection, dropped, "dropped collection");
        }
        Operation::Note { message, manual: true } => tracing::warn!("manual step required: {}", message),
        Operation::Note { message, .. } => tracing::info!("{}", message),
    }
    Ok(())
}
