//! Migration registry: one record per version in the `_migrations`
//! collection of the migrated database.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::unit::parse_version;
use crate::error::{MigrateError, Result};
use crate::schema::IndexOrder;
use crate::store::{DocumentStore, IndexSpec, to_document};

pub const REGISTRY_COLLECTION: &str = "_migrations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub executed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub status: MigrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the unit has a `down`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Typed access to the registry collection.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn DocumentStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Ensure the unique index on `version`.
    pub async fn ensure_index(&self) -> Result<()> {
        let index = IndexSpec::new(
            IndexMap::from([("version".to_string(), IndexOrder::Direction(1))]),
            true,
        );
        self.store.create_index(REGISTRY_COLLECTION, &index).await?;
        Ok(())
    }

    /// All records, ordered by version.
    pub async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let mut records = Vec::new();
        for document in self.store.find_all(REGISTRY_COLLECTION).await? {
            let record: MigrationRecord = serde_json::from_value(document.into())
                .map_err(|e| MigrateError::json(REGISTRY_COLLECTION, e))?;
            records.push(record);
        }
        records.sort_by_key(|r| (parse_version(&r.version), r.version.clone()));
        Ok(records)
    }

    pub async fn completed_versions(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.status == MigrationStatus::Completed)
            .map(|r| r.version)
            .collect())
    }

    /// The completed record applied most recently.
    pub async fn latest_completed(&self) -> Result<Option<MigrationRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.status == MigrationStatus::Completed)
            .max_by(|a, b| {
                a.applied_at
                    .cmp(&b.applied_at)
                    .then_with(|| a.version.cmp(&b.version))
            }))
    }

    /// Insert or overwrite the record for its version.
    pub async fn record(&self, record: &MigrationRecord) -> Result<()> {
        let document = to_document(record).map_err(|e| MigrateError::json(REGISTRY_COLLECTION, e))?;
        tracing::debug!(version = %record.version, status = %record.status, "registry write");
        self.store
            .upsert(REGISTRY_COLLECTION, &record.version, document)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, version: &str) -> Result<bool> {
        tracing::debug!(version, "registry delete");
        Ok(self.store.delete(REGISTRY_COLLECTION, version).await?)
    }
}
