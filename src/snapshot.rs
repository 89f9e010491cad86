//! Timestamped snapshot files.
//!
//! Snapshots live in `migrations/snapshots/` as `<timestamp>.json`, one file
//! per save, never rewritten. File names sort chronologically, so the latest
//! snapshot is the lexicographically greatest name.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::error::{MigrateError, Result};
use crate::schema::Snapshot;

const FILE_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// A snapshot read back from disk.
#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub path: PathBuf,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a snapshot stamped with the current time.
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        self.save_at(snapshot, Utc::now())
    }

    /// Save a snapshot stamped with `at`.
    ///
    /// If a file with that stamp exists the stamp moves forward one
    /// millisecond at a time, so an earlier snapshot is never overwritten and
    /// ordering by name still follows save order.
    pub fn save_at(&self, snapshot: &Snapshot, at: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| MigrateError::io(&self.dir, e))?;

        let text = serde_json::to_string_pretty(snapshot).map_err(|e| MigrateError::json(&self.dir, e))?;

        let mut stamp = at;
        if let Some(latest) = self.latest_name()? {
            // keep names increasing even if the clock stepped back
            while file_name(stamp) <= latest {
                stamp += Duration::milliseconds(1);
            }
        }

        loop {
            let path = self.dir.join(file_name(stamp));
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path);
            match created {
                Ok(mut file) => {
                    use std::io::Write;
                    file.write_all(text.as_bytes())
                        .and_then(|_| file.write_all(b"\n"))
                        .map_err(|e| MigrateError::io(&path, e))?;
                    tracing::info!(path = %path.display(), entities = snapshot.len(), "saved snapshot");
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    stamp += Duration::milliseconds(1);
                }
                Err(e) => return Err(MigrateError::io(&path, e)),
            }
        }
    }

    /// Snapshot file paths, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MigrateError::io(&self.dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| MigrateError::io(&self.dir, e))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn latest_name(&self) -> Result<Option<String>> {
        Ok(self
            .list()?
            .last()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned()))
    }

    /// The most recent snapshot, or `None` if none was ever saved.
    pub fn latest(&self) -> Result<Option<SavedSnapshot>> {
        let Some(path) = self.list()?.pop() else {
            return Ok(None);
        };
        let text = fs::read_to_string(&path).map_err(|e| MigrateError::io(&path, e))?;
        let snapshot = serde_json::from_str(&text).map_err(|e| MigrateError::json(&path, e))?;
        Ok(Some(SavedSnapshot { path, snapshot }))
    }
}

fn file_name(at: DateTime<Utc>) -> String {
    format!("{}.json", at.format(FILE_FORMAT))
}
