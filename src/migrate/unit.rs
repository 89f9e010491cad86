//! Migration unit files.
//!
//! A unit is `migrations/<version>_<name>.json`:
//!
//! ```json
//! {
//!   "version": "002",
//!   "name": "add_price_to_widget",
//!   "description": "+ Widget.price: number",
//!   "createdAt": "2024-05-01T10:00:00Z",
//!   "destructive": false,
//!   "up": [
//!     { "op": "set_missing", "collection": "widgets", "field": "price", "value": 0 }
//!   ],
//!   "down": [
//!     { "op": "unset_field", "collection": "widgets", "field": "price" }
//!   ]
//! }
//! ```

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MigrateError, Result};
use crate::schema::IndexDescriptor;

/// One step of a unit's `up` or `down`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Set `field` on documents that do not have it.
    SetMissing {
        collection: String,
        field: String,
        value: Value,
    },
    UnsetField {
        collection: String,
        field: String,
    },
    RenameField {
        collection: String,
        from: String,
        to: String,
    },
    CreateIndex {
        collection: String,
        index: IndexDescriptor,
    },
    /// Drop the index whose field signature matches `index`.
    DropIndex {
        collection: String,
        index: IndexDescriptor,
    },
    DropCollection {
        collection: String,
    },
    /// Logged, never executed. `manual` marks steps a human must perform.
    Note {
        message: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        manual: bool,
    },
}

impl Operation {
    pub fn note(message: impl Into<String>) -> Self {
        Operation::Note {
            message: message.into(),
            manual: false,
        }
    }

    pub fn manual(message: impl Into<String>) -> Self {
        Operation::Note {
            message: message.into(),
            manual: true,
        }
    }

    /// Operations that lose data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Operation::UnsetField { .. } | Operation::DropCollection { .. }
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::SetMissing { collection, field, value } => {
                write!(f, "set {}.{} = {} where missing", collection, field, value)
            }
            Operation::UnsetField { collection, field } => write!(f, "unset {}.{}", collection, field),
            Operation::RenameField { collection, from, to } => {
                write!(f, "rename {}.{} to {}", collection, from, to)
            }
            Operation::CreateIndex { collection, index } => {
                write!(f, "create index {} on {}", index, collection)
            }
            Operation::DropIndex { collection, index } => {
                write!(f, "drop index {} on {}", index, collection)
            }
            Operation::DropCollection { collection } => write!(f, "drop collection {}", collection),
            Operation::Note { message, manual: true } => write!(f, "manual step: {}", message),
            Operation::Note { message, .. } => write!(f, "note: {}", message),
        }
    }
}

/// A versioned migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationUnit {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub destructive: bool,
    #[serde(default)]
    pub up: Vec<Operation>,
    /// `None` when the unit cannot be reverted.
    #[serde(default)]
    pub down: Option<Vec<Operation>>,
}

impl MigrationUnit {
    /// An empty unit for hand-written migrations.
    pub fn blank(version: impl Into<String>, name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            name: sanitize_name(name),
            description: String::new(),
            created_at,
            destructive: false,
            up: Vec::new(),
            down: None,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.json", self.version, self.name)
    }
}

/// A unit read from disk.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub unit: MigrationUnit,
    pub path: PathBuf,
    /// md5 of the file contents.
    pub checksum: String,
}

pub fn format_version(number: u32) -> String {
    format!("{:03}", number)
}

pub fn parse_version(version: &str) -> Option<u32> {
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

/// Lower-case snake form usable in a file name.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "migration".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<digits>_<name>.json` → version prefix.
fn version_prefix(path: &Path) -> Option<&str> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(".json")?;
    let (version, _) = stem.split_once('_')?;
    parse_version(version).map(|_| version)
}

fn unit_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(MigrateError::MigrationsDir {
                path: dir.to_path_buf(),
                source,
            });
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| MigrateError::MigrationsDir {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_file() && version_prefix(&path).is_some() {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Load every unit in `dir`, ordered by version.
///
/// A missing directory has no units. Duplicate versions and units whose
/// `version` field disagrees with the file name are rejected.
pub fn load_units(dir: &Path) -> Result<Vec<LoadedUnit>> {
    let mut units = Vec::new();
    for path in unit_paths(dir)? {
        let bytes = fs::read(&path).map_err(|e| MigrateError::io(&path, e))?;
        let unit: MigrationUnit = serde_json::from_slice(&bytes).map_err(|e| MigrateError::InvalidUnit {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if version_prefix(&path) != Some(unit.version.as_str()) {
            return Err(MigrateError::InvalidUnit {
                path,
                reason: format!("version {} does not match file name", unit.version),
            });
        }

        units.push(LoadedUnit {
            checksum: format!("{:x}", md5::compute(&bytes)),
            unit,
            path,
        });
    }

    units.sort_by(|a, b| {
        let key = |u: &LoadedUnit| (parse_version(&u.unit.version), u.path.clone());
        key(a).cmp(&key(b))
    });

    for pair in units.windows(2) {
        if parse_version(&pair[0].unit.version) == parse_version(&pair[1].unit.version) {
            return Err(MigrateError::InvalidUnit {
                path: pair[1].path.clone(),
                reason: format!("duplicate version {}", pair[1].unit.version),
            });
        }
    }

    tracing::debug!(dir = %dir.display(), count = units.len(), "loaded migration units");
    Ok(units)
}

/// Version following the highest one present in `dir`.
pub fn next_version(dir: &Path) -> Result<String> {
    let highest = unit_paths(dir)?
        .into_iter()
        .filter_map(|p| version_prefix(&p).and_then(parse_version).map(|v| (v, p)))
        .max();
    match highest {
        None => Ok(format_version(1)),
        Some((version, path)) => version
            .checked_add(1)
            .map(format_version)
            .ok_or_else(|| MigrateError::InvalidUnit {
                path,
                reason: format!("version {} is the last one available", version),
            }),
    }
}

/// Write a new unit file. Never overwrites.
pub fn write_unit(dir: &Path, unit: &MigrationUnit) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| MigrateError::io(dir, e))?;
    let path = dir.join(unit.file_name());
    let text = serde_json::to_string_pretty(unit).map_err(|e| MigrateError::json(&path, e))?;

    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(MigrateError::AlreadyExists(path));
        }
        Err(e) => return Err(MigrateError::io(&path, e)),
    };
    file.write_all(text.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|e| MigrateError::io(&path, e))?;

    tracing::info!(path = %path.display(), "wrote migration unit");
    Ok(path)
}
