//! File-side operations: extraction, snapshots, diffing and unit generation.
//!
//! None of these touch the database.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::config::Config;
use crate::error::Result;
use crate::migrate::{MigrationUnit, generate, next_version, write_unit};
use crate::schema::{Extraction, SchemaDiff, SkippedEntity, Snapshot, diff_snapshots, extract, load_sources};
use crate::snapshot::SnapshotStore;

/// Result of comparing the models against the latest snapshot.
#[derive(Debug, Clone)]
pub struct DiffReport {
    pub diff: SchemaDiff,
    /// Snapshot compared against; `None` on the first run.
    pub previous: Option<PathBuf>,
    pub current: Snapshot,
    pub skipped: Vec<SkippedEntity>,
}

#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    /// Models match the latest snapshot. Nothing was written.
    NoChanges,
    Generated {
        unit: MigrationUnit,
        path: PathBuf,
        snapshot: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct Workspace {
    models_dir: PathBuf,
    migrations_dir: PathBuf,
}

impl Workspace {
    pub fn new(models_dir: impl Into<PathBuf>, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            migrations_dir: migrations_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.models_dir, &config.migrations_dir)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(self.migrations_dir.join("snapshots"))
    }

    /// Extract the current schemas from the models directory.
    pub fn extract(&self) -> Result<Extraction> {
        let sources = load_sources(&self.models_dir)?;
        Ok(extract(&sources))
    }

    /// Diff the models against the latest snapshot.
    pub fn diff(&self) -> Result<DiffReport> {
        let extraction = self.extract()?;
        self.diff_extraction(extraction)
    }

    fn diff_extraction(&self, extraction: Extraction) -> Result<DiffReport> {
        let previous = self.snapshots().latest()?;
        let current = extraction.resolve_against(previous.as_ref().map(|p| &p.snapshot));
        let diff = diff_snapshots(&current, previous.as_ref().map(|p| &p.snapshot));
        Ok(DiffReport {
            diff,
            previous: previous.map(|p| p.path),
            current,
            skipped: extraction.skipped,
        })
    }

    /// Extract, diff and, if anything changed, write the next unit and a new
    /// snapshot.
    pub fn generate(&self, name: Option<&str>) -> Result<GenerateOutcome> {
        let extraction = self.extract()?;
        self.generate_from_extraction(extraction, name)
    }

    /// Same as [`Workspace::generate`] for schemas built in process.
    pub fn generate_from(&self, current: Snapshot, name: Option<&str>) -> Result<GenerateOutcome> {
        self.generate_from_extraction(
            Extraction {
                snapshot: current,
                skipped: Vec::new(),
            },
            name,
        )
    }

    fn generate_from_extraction(&self, extraction: Extraction, name: Option<&str>) -> Result<GenerateOutcome> {
        let report = self.diff_extraction(extraction)?;
        let version = next_version(&self.migrations_dir)?;

        let Some(unit) = generate(&report.diff, &version, name, Utc::now()) else {
            tracing::info!("no schema changes detected");
            return Ok(GenerateOutcome::NoChanges);
        };

        let path = write_unit(&self.migrations_dir, &unit)?;
        let snapshot = self.snapshots().save(&report.current)?;
        Ok(GenerateOutcome::Generated { unit, path, snapshot })
    }

    /// Save a snapshot of the current models without generating a unit.
    pub fn snapshot(&self) -> Result<(PathBuf, Extraction)> {
        let extraction = self.extract()?;
        let previous = self.snapshots().latest()?;
        let current = extraction.resolve_against(previous.as_ref().map(|p| &p.snapshot));
        let path = self.snapshots().save(&current)?;
        Ok((path, extraction))
    }

    /// Write an empty unit for a hand-written migration.
    pub fn create(&self, name: &str) -> Result<(MigrationUnit, PathBuf)> {
        let version = next_version(&self.migrations_dir)?;
        let unit = MigrationUnit::blank(version, name, Utc::now());
        let path = write_unit(&self.migrations_dir, &unit)?;
        Ok((unit, path))
    }
}
