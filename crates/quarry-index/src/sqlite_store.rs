//! Durable index backend on `SQLite`.
//!
//! Vectors are stored as little-endian `f32` BLOBs next to a JSON payload.
//! Search is an exact brute-force cosine scan over one collection.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::Result;
use crate::vector_store::{
    BoxFuture, CollectionInfo, Payload, ScoredVectorPoint, StoredPayload, VectorFilter,
    VectorPoint, VectorStore, VectorStoreError, cosine_similarity, rank_and_truncate,
};

#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the index database at `path` and run migrations.
    /// `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let mut opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // every connection to :memory: is a separate database
        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_opts.connect_with(opts).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path, "opened sqlite vector store");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn dimension_of(&self, collection: &str) -> std::result::Result<Option<usize>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT dimension FROM collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(d,)| usize::try_from(d).ok()))
    }
}

pub(crate) fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub(crate) fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn decode_payload(raw: &str) -> std::result::Result<Payload, VectorStoreError> {
    serde_json::from_str(raw).map_err(|e| VectorStoreError::Serialization(e.to_string()))
}

/// Path equality is pushed into SQL; the full filter is still applied in Rust.
fn path_condition(filter: Option<&VectorFilter>) -> Option<String> {
    filter?.must.iter().find_map(|cond| match (&*cond.field, &cond.value) {
        ("path", crate::vector_store::FieldValue::Text(p)) => Some(p.clone()),
        _ => None,
    })
}

impl VectorStore for SqliteVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        info: &CollectionInfo,
    ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        let info = info.clone();
        Box::pin(async move {
            let dimension = i64::try_from(info.dimension)
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            sqlx::query(
                "INSERT INTO collections (name, model, dimension) VALUES (?, ?, ?) \
                 ON CONFLICT(name) DO NOTHING",
            )
            .bind(&collection)
            .bind(&info.model)
            .bind(dimension)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn collection_info(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, std::result::Result<Option<CollectionInfo>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let row: Option<(String, i64)> =
                sqlx::query_as("SELECT model, dimension FROM collections WHERE name = ?")
                    .bind(&collection)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            row.map(|(model, dimension)| {
                let dimension = usize::try_from(dimension)
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
                Ok(CollectionInfo { model, dimension })
            })
            .transpose()
        })
    }

    fn delete_collection(
        &self,
        collection: &str,
    ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            sqlx::query("DELETE FROM points WHERE collection = ?")
                .bind(&collection)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            sqlx::query("DELETE FROM collections WHERE name = ?")
                .bind(&collection)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let dimension = self
                .dimension_of(&collection)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?
                .ok_or_else(|| {
                    VectorStoreError::Upsert(format!("collection {collection} not found"))
                })?;
            if let Some(bad) = points.iter().find(|p| p.vector.len() != dimension) {
                return Err(VectorStoreError::Upsert(format!(
                    "point {} has dimension {}, collection expects {dimension}",
                    bad.id,
                    bad.vector.len()
                )));
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            for p in &points {
                let payload = serde_json::to_string(&p.payload)
                    .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
                let path = p.payload.get("path").and_then(|v| v.as_str());
                sqlx::query(
                    "INSERT INTO points (collection, id, vector, payload, path) \
                     VALUES (?, ?, ?, ?, ?) \
                     ON CONFLICT(collection, id) DO UPDATE SET \
                     vector = excluded.vector, payload = excluded.payload, \
                     path = excluded.path, updated_at = datetime('now')",
                )
                .bind(&collection)
                .bind(&p.id)
                .bind(vec_to_blob(&p.vector))
                .bind(payload)
                .bind(path)
                .execute(&mut *tx)
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            }
            // dropping an uncommitted transaction rolls it back
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, std::result::Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let rows: Vec<(String, Vec<u8>, String)> = match path_condition(filter.as_ref()) {
                Some(path) => sqlx::query_as::<_, (String, Vec<u8>, String)>(
                    "SELECT id, vector, payload FROM points WHERE collection = ? AND path = ?",
                )
                .bind(&collection)
                .bind(path)
                .fetch_all(&self.pool)
                .await,
                None => sqlx::query_as::<_, (String, Vec<u8>, String)>(
                    "SELECT id, vector, payload FROM points WHERE collection = ?",
                )
                .bind(&collection)
                .fetch_all(&self.pool)
                .await,
            }
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;

            let mut scored = Vec::with_capacity(rows.len());
            for (id, blob, raw) in rows {
                let payload = decode_payload(&raw)?;
                if filter.as_ref().is_some_and(|f| !f.matches(&payload)) {
                    continue;
                }
                scored.push(ScoredVectorPoint {
                    id,
                    score: cosine_similarity(&vector, &blob_to_vec(&blob)),
                    payload,
                });
            }
            rank_and_truncate(&mut scored, limit);
            Ok(scored)
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, std::result::Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            for id in &ids {
                sqlx::query("DELETE FROM points WHERE collection = ? AND id = ?")
                    .bind(&collection)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(())
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, std::result::Result<Vec<StoredPayload>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let rows: Vec<(String, String)> = match path_condition(filter.as_ref()) {
                Some(path) => sqlx::query_as::<_, (String, String)>(
                    "SELECT id, payload FROM points WHERE collection = ? AND path = ? ORDER BY id",
                )
                .bind(&collection)
                .bind(path)
                .fetch_all(&self.pool)
                .await,
                None => sqlx::query_as::<_, (String, String)>(
                    "SELECT id, payload FROM points WHERE collection = ? ORDER BY id",
                )
                .bind(&collection)
                .fetch_all(&self.pool)
                .await,
            }
            .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;

            let mut out = Vec::with_capacity(rows.len());
            for (id, raw) in rows {
                let payload = decode_payload(&raw)?;
                if filter.as_ref().is_none_or(|f| f.matches(&payload)) {
                    out.push(StoredPayload { id, payload });
                }
            }
            Ok(out)
        })
    }

    fn count(&self, collection: &str) -> BoxFuture<'_, std::result::Result<usize, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM points WHERE collection = ?")
                .bind(&collection)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            usize::try_from(n).map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn list_collections(
        &self,
    ) -> BoxFuture<'_, std::result::Result<Vec<String>, VectorStoreError>> {
        Box::pin(async move {
            let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(rows.into_iter().map(|(name,)| name).collect())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pool.close().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn info(dimension: usize) -> CollectionInfo {
        CollectionInfo {
            model: "hash-v1-3".into(),
            dimension,
        }
    }

    fn point(id: &str, vector: Vec<f32>, path: &str) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::from([
                ("path".into(), serde_json::json!(path)),
                ("start_line".into(), serde_json::json!(1)),
            ]),
        }
    }

    #[test]
    fn blob_roundtrip_preserves_values() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[tokio::test]
    async fn open_in_memory_and_create_collection() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        assert!(store.collection_info("proj").await.unwrap().is_none());
        store.ensure_collection("proj", &info(3)).await.unwrap();
        assert_eq!(store.collection_info("proj").await.unwrap(), Some(info(3)));
        assert_eq!(store.list_collections().await.unwrap(), vec!["proj".to_owned()]);
    }

    #[tokio::test]
    async fn upsert_search_and_overwrite() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.ensure_collection("proj", &info(3)).await.unwrap();
        store
            .upsert(
                "proj",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "a.py"),
                    point("b", vec![0.0, 1.0, 0.0], "b.py"),
                ],
            )
            .await
            .unwrap();
        store
            .upsert("proj", vec![point("b", vec![0.0, 0.0, 1.0], "b.py")])
            .await
            .unwrap();
        assert_eq!(store.count("proj").await.unwrap(), 2);

        let hits = store
            .search("proj", vec![0.0, 0.0, 1.0], 5, None)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].payload["path"], "b.py");
    }

    #[tokio::test]
    async fn wrong_dimension_rolls_back_whole_batch() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.ensure_collection("proj", &info(3)).await.unwrap();
        let err = store
            .upsert(
                "proj",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "a.py"),
                    point("b", vec![1.0, 0.0], "b.py"),
                ],
            )
            .await;
        assert!(matches!(err, Err(VectorStoreError::Upsert(_))));
        assert_eq!(store.count("proj").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_and_scroll_with_path_filter() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.ensure_collection("proj", &info(3)).await.unwrap();
        store
            .upsert(
                "proj",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "a.py"),
                    point("b", vec![1.0, 0.1, 0.0], "b.py"),
                    point("c", vec![0.5, 0.5, 0.0], "a.py"),
                ],
            )
            .await
            .unwrap();
        let filter = VectorFilter::text_eq("path", "a.py");
        let hits = store
            .search("proj", vec![1.0, 0.0, 0.0], 10, Some(filter.clone()))
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let rows = store.scroll("proj", Some(filter)).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn delete_by_ids_and_collection() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        store.ensure_collection("proj", &info(3)).await.unwrap();
        store
            .upsert(
                "proj",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "a.py"),
                    point("b", vec![0.0, 1.0, 0.0], "b.py"),
                ],
            )
            .await
            .unwrap();
        store.delete_by_ids("proj", vec!["a".into()]).await.unwrap();
        assert_eq!(store.count("proj").await.unwrap(), 1);

        store.delete_collection("proj").await.unwrap();
        assert_eq!(store.count("proj").await.unwrap(), 0);
        assert!(store.collection_info("proj").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_collection_reads_are_empty() {
        let store = SqliteVectorStore::open(":memory:").await.unwrap();
        assert!(store.search("none", vec![1.0], 3, None).await.unwrap().is_empty());
        assert!(store.scroll("none", None).await.unwrap().is_empty());
        assert!(
            store
                .upsert("none", vec![point("a", vec![1.0], "a.py")])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteVectorStore::open(path).await.unwrap();
            store.ensure_collection("proj", &info(3)).await.unwrap();
            store
                .upsert("proj", vec![point("a", vec![1.0, 0.0, 0.0], "a.py")])
                .await
                .unwrap();
            store.close().await;
        }
        let store = SqliteVectorStore::open(path).await.unwrap();
        assert_eq!(store.collection_info("proj").await.unwrap(), Some(info(3)));
        assert_eq!(store.count("proj").await.unwrap(), 1);
    }
}
