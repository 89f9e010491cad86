//! JSON file store: one `<collection>.json` file per collection.
//!
//! Writes go to a temporary file that is synced and then renamed over the
//! collection file. Each read-modify-write holds `<collection>.lock`, created
//! with `create_new`, so concurrent processes sharing a directory serialize
//! their writes and compare-and-swap stays atomic across processes.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::collection::{Collection, Document, IndexSpec};
use super::{DocumentStore, StoreError, StoreResult};

const LOCK_RETRY: Duration = Duration::from_millis(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
/// A lock file older than this was left by a crashed writer.
const LOCK_STALE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct JsonDbStore {
    root: PathBuf,
    writer: Mutex<()>,
}

impl JsonDbStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| io(&root, e))?;
        Ok(Self {
            root,
            writer: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> StoreResult<PathBuf> {
        let valid = !collection.is_empty()
            && !collection.starts_with('.')
            && !collection.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidCollection(collection.to_string()));
        }
        Ok(self.root.join(format!("{}.json", collection)))
    }

    async fn load(&self, path: &Path) -> StoreResult<Collection> {
        match fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Collection::default()),
            Err(e) => Err(io(path, e)),
        }
    }

    async fn read<T>(&self, collection: &str, f: impl FnOnce(&Collection) -> T) -> StoreResult<T> {
        let path = self.collection_path(collection)?;
        let state = self.load(&path).await?;
        Ok(f(&state))
    }

    async fn write<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut Collection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let path = self.collection_path(collection)?;
        let _writer = self.writer.lock().await;
        let _file_lock = FileLock::acquire(path.with_extension("lock")).await?;

        let before = self.load(&path).await?;
        let mut state = before.clone();
        let out = f(&mut state)?;
        if state != before {
            let text = serde_json::to_string_pretty(&state).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
            atomic_write(&path, text.as_bytes()).await?;
        }
        Ok(out)
    }
}

fn io(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write to `<path>.tmp`, sync, then rename over `path`.
async fn atomic_write(path: &Path, content: &[u8]) -> StoreResult<()> {
    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&temp_path).await.map_err(|e| io(&temp_path, e))?;
        file.write_all(content).await.map_err(|e| io(&temp_path, e))?;
        file.sync_all().await.map_err(|e| io(&temp_path, e))?;
    }
    fs::rename(&temp_path, path).await.map_err(|e| io(path, e))
}

/// Exclusive lock file, removed on drop.
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    async fn acquire(path: PathBuf) -> StoreResult<Self> {
        let started = tokio::time::Instant::now();
        loop {
            let created = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match created {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        tracing::warn!(path = %path.display(), "removing stale lock file");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                    if started.elapsed() > LOCK_TIMEOUT {
                        return Err(StoreError::Busy(path));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(io(&path, e)),
            }
        }
    }
}

async fn is_stale(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .is_some_and(|age| age > LOCK_STALE)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl DocumentStore for JsonDbStore {
    fn backend(&self) -> &'static str {
        "jsondb"
    }

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.read(collection, Collection::find_all).await
    }

    async fn find_one(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.read(collection, |c| c.find_one(id)).await
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.write(collection, |c| c.insert(collection, document)).await
    }

    async fn upsert(&self, collection: &str, id: &str, document: Document) -> StoreResult<()> {
        self.write(collection, |c| c.upsert(collection, id, document)).await
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.write(collection, |c| Ok(c.delete(id))).await
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        expected: Option<&Document>,
        replacement: Document,
    ) -> StoreResult<bool> {
        self.write(collection, |c| c.compare_and_swap(collection, id, expected, replacement))
            .await
    }

    async fn set_where_missing(&self, collection: &str, field: &str, value: &Value) -> StoreResult<u64> {
        self.write(collection, |c| Ok(c.set_where_missing(field, value))).await
    }

    async fn unset_field(&self, collection: &str, field: &str) -> StoreResult<u64> {
        self.write(collection, |c| Ok(c.unset_field(field))).await
    }

    async fn rename_field(&self, collection: &str, from: &str, to: &str) -> StoreResult<u64> {
        self.write(collection, |c| Ok(c.rename_field(from, to))).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        self.write(collection, |c| c.create_index(collection, index)).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<bool> {
        self.write(collection, |c| Ok(c.drop_index(name))).await
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        self.read(collection, |c| c.indexes.clone()).await
    }

    async fn drop_collection(&self, collection: &str) -> StoreResult<bool> {
        let path = self.collection_path(collection)?;
        let _writer = self.writer.lock().await;
        let _file_lock = FileLock::acquire(path.with_extension("lock")).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io(&path, e)),
        }
    }
}
