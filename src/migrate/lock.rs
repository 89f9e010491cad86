//! Advisory migration lock.
//!
//! A single document in `_migration_lock` records who holds the lock and
//! until when. It is taken with compare-and-swap, either from absent or from
//! an expired holder, so two runners never both believe they hold it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::store::{Document, DocumentStore, to_document};

pub const LOCK_COLLECTION: &str = "_migration_lock";
const LOCK_ID: &str = "migrations";

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockDocument {
    #[serde(rename = "_id")]
    id: String,
    held_by: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct MigrationLock {
    store: Arc<dyn DocumentStore>,
    ttl: Duration,
}

impl MigrationLock {
    pub fn new(store: Arc<dyn DocumentStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Take the lock for `holder`, failing with [`MigrateError::LockHeld`]
    /// while another holder's lock is unexpired.
    pub async fn acquire(&self, holder: &str) -> Result<LockGuard> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| MigrateError::Config(format!("lock ttl out of range: {}", e)))?;
        let ours = LockDocument {
            id: LOCK_ID.to_string(),
            held_by: format!("{}@{}", holder, std::process::id()),
            acquired_at: now,
            expires_at: now + ttl,
        };
        let replacement = to_document(&ours).map_err(|e| MigrateError::json(LOCK_COLLECTION, e))?;

        let current = self.store.find_one(LOCK_COLLECTION, LOCK_ID).await?;
        if let Some(current) = &current {
            let held: LockDocument = serde_json::from_value(current.clone().into())
                .map_err(|e| MigrateError::json(LOCK_COLLECTION, e))?;
            if held.expires_at > now {
                return Err(MigrateError::LockHeld {
                    holder: held.held_by,
                    expires_at: held.expires_at.to_rfc3339(),
                });
            }
            tracing::warn!(holder = %held.held_by, "taking over expired migration lock");
        }

        let swapped = self
            .store
            .compare_and_swap(LOCK_COLLECTION, LOCK_ID, current.as_ref(), replacement.clone())
            .await?;
        if !swapped {
            // someone else got there between our read and the swap
            let holder = self
                .store
                .find_one(LOCK_COLLECTION, LOCK_ID)
                .await?
                .and_then(|d| serde_json::from_value::<LockDocument>(d.into()).ok());
            return Err(match holder {
                Some(held) => MigrateError::LockHeld {
                    holder: held.held_by,
                    expires_at: held.expires_at.to_rfc3339(),
                },
                None => MigrateError::LockHeld {
                    holder: "unknown".to_string(),
                    expires_at: "unknown".to_string(),
                },
            });
        }

        tracing::debug!(holder = %ours.held_by, "acquired migration lock");
        Ok(LockGuard {
            store: Arc::clone(&self.store),
            held: replacement,
        })
    }
}

/// A held lock. Call [`LockGuard::release`] when the batch is done.
#[must_use = "the lock stays held until released or expired"]
pub struct LockGuard {
    store: Arc<dyn DocumentStore>,
    held: Document,
}

impl LockGuard {
    /// Release the lock if it is still ours.
    pub async fn release(self) -> Result<()> {
        let current = self.store.find_one(LOCK_COLLECTION, LOCK_ID).await?;
        if current.as_ref() == Some(&self.held) {
            self.store.delete(LOCK_COLLECTION, LOCK_ID).await?;
            tracing::debug!("released migration lock");
        } else {
            tracing::warn!("migration lock was taken over before release");
        }
        Ok(())
    }
}
