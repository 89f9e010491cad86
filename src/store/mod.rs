//! Document database access.
//!
//! Everything that touches the database goes through [`DocumentStore`], so
//! the registry, the lock and unit execution run unchanged against any
//! backend. Two backends ship with the crate:
//!
//! - `memory://` keeps collections in process memory (tests, dry runs)
//! - `jsondb://<dir>` (or `file://<dir>`) keeps one JSON file per collection
//!
//! A [`Database`] resolves its URL lazily: commands that never touch the
//! database (`generate`, `snapshot`, `diff`) never need one configured.

mod collection;
mod jsondb;
mod memory;

pub use collection::{Document, IndexSpec, document_id, to_document};
pub use jsondb::JsonDbStore;
pub use memory::MemoryStore;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Errors raised by a [`DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no database url configured (set DOCSHIFT_DATABASE_URL or pass --database-url)")]
    NotConfigured,

    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),

    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("document in {collection} has no _id")]
    MissingId { collection: String },

    #[error("duplicate key on {collection}.{index}: {key}")]
    DuplicateKey {
        collection: String,
        index: String,
        key: String,
    },

    #[error("index {index} already exists on {collection} with different keys")]
    IndexConflict { collection: String, index: String },

    #[error("timed out waiting for {0}")]
    Busy(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt collection file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Operations the migration subsystem needs from a document database.
///
/// Field operations address top-level fields only. Counts returned by the
/// bulk operations are the number of documents changed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs, e.g. `memory`.
    fn backend(&self) -> &'static str;

    /// All documents of a collection in insertion order.
    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>>;

    async fn find_one(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Insert a new document; fails with [`StoreError::DuplicateKey`] if
    /// its `_id` or a unique index key is taken.
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()>;

    /// Insert or replace the document with the given `_id`.
    async fn upsert(&self, collection: &str, id: &str, document: Document) -> StoreResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Atomically replace the document `id` if its current value equals
    /// `expected` (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: Option<&Document>,
        replacement: Document,
    ) -> StoreResult<bool>;

    /// Set `field` to `value` on every document that lacks it.
    async fn set_where_missing(&self, collection: &str, field: &str, value: &Value) -> StoreResult<u64>;

    async fn unset_field(&self, collection: &str, field: &str) -> StoreResult<u64>;

    async fn rename_field(&self, collection: &str, from: &str, to: &str) -> StoreResult<u64>;

    /// Create an index. Creating an identical index again is a no-op.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()>;

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<bool>;

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>>;

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool>;
}

/// Open a store for a connection URL.
pub async fn connect(url: &str) -> StoreResult<Arc<dyn DocumentStore>> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| StoreError::UnsupportedUrl(url.to_string()))?;

    match scheme {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "jsondb" | "file" if !rest.is_empty() => Ok(Arc::new(JsonDbStore::open(rest).await?)),
        _ => Err(StoreError::UnsupportedUrl(url.to_string())),
    }
}

/// Lazily connected database handle.
///
/// The connection is opened on first use and shared afterwards. Tests inject
/// a store directly with [`Database::with_store`].
pub struct Database {
    url: Option<String>,
    store: OnceCell<Arc<dyn DocumentStore>>,
}

impl Database {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            store: OnceCell::new(),
        }
    }

    pub fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            url: None,
            store: OnceCell::new_with(Some(store)),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// The connected store, connecting on first call.
    pub async fn store(&self) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                let url = self.url.as_deref().ok_or(StoreError::NotConfigured)?;
                let store = connect(url).await?;
                tracing::debug!(backend = store.backend(), "connected to database");
                Ok::<_, StoreError>(store)
            })
            .await?;
        Ok(Arc::clone(store))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("url", &self.url)
            .field("connected", &self.store.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_by_scheme() {
        let store = connect("memory://").await.unwrap();
        assert_eq!(store.backend(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let url = format!("jsondb://{}", dir.path().display());
        assert_eq!(connect(&url).await.unwrap().backend(), "jsondb");

        assert!(matches!(
            connect("postgres://localhost/db").await,
            Err(StoreError::UnsupportedUrl(_))
        ));
        assert!(matches!(connect("jsondb://").await, Err(StoreError::UnsupportedUrl(_))));
        assert!(matches!(connect("nonsense").await, Err(StoreError::UnsupportedUrl(_))));
    }

    #[tokio::test]
    async fn test_missing_url_fails_on_first_use() {
        let db = Database::new(None);
        assert!(matches!(db.store().await, Err(StoreError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_connection_is_shared() {
        let db = Database::new(Some("memory://".to_string()));
        let a = db.store().await.unwrap();
        let b = db.store().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
