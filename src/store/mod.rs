//! Persistent vector store over SQLite + sqlite-vec.
//!
//! A [`VectorStore`] owns one connection rooted at a storage directory and one
//! bound [`Collection`]. Writes go through [`VectorStore::try_upsert`], which
//! validates the parallel id/text/embedding/metadata sequences and writes them in
//! a single transaction. Queries return the columnar [`QueryResult`], which
//! [`QueryResult::into_matches`] turns into row-shaped [`SearchMatch`]es.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, Once};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use sqlite_vec::sqlite3_vec_init;

use crate::error::{RagError, RagResult};

/// Free-form record metadata. Values must be scalars (string, number, bool).
pub type Metadata = serde_json::Map<String, Value>;

/// Database file created inside the storage directory.
pub const DB_FILE: &str = "store.sqlite3";

/// Largest `k` sqlite-vec accepts for a KNN query.
const MAX_K: usize = 4096;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            std::mem::size_of_val(embedding),
        )
    }
}

/// Handle to a named collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: i64,
    pub name: String,
}

/// Summary row for `list_collections`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    /// `None` until the first embedding is written.
    pub dimension: Option<usize>,
    pub count: usize,
}

/// Columnar k-NN result, closest first. The four vectors are parallel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub documents: Vec<String>,
    pub distances: Vec<f64>,
    pub ids: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

/// One row of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub text: String,
    pub distance: f64,
    pub id: String,
    pub metadata: Metadata,
}

/// A persisted record, as returned by [`VectorStore::get`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub created_at: String,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Zip the columns into rows, one per document. A column shorter than
    /// `documents` contributes `0.0`, `""` or `{}` for the missing entries.
    pub fn into_matches(self) -> Vec<SearchMatch> {
        let QueryResult {
            documents,
            distances,
            ids,
            metadatas,
        } = self;
        let mut distances = distances.into_iter();
        let mut ids = ids.into_iter();
        let mut metadatas = metadatas.into_iter();

        documents
            .into_iter()
            .map(|text| SearchMatch {
                text,
                distance: distances.next().unwrap_or(0.0),
                id: ids.next().unwrap_or_default(),
                metadata: metadatas.next().unwrap_or_default(),
            })
            .collect()
    }
}

/// Path-addressed vector store with one bound collection.
pub struct VectorStore {
    root: PathBuf,
    conn: Mutex<Option<Connection>>,
    collection: Mutex<Option<Collection>>,
}

impl VectorStore {
    /// Create an unconnected store rooted at `root`. Nothing touches disk until
    /// [`init_client`](Self::init_client).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            conn: Mutex::new(None),
            collection: Mutex::new(None),
        }
    }

    /// Connect and bind `collection` in one step.
    pub fn open(root: impl Into<PathBuf>, collection: &str) -> RagResult<Self> {
        let store = Self::new(root);
        store.try_init_client()?;
        store.get_or_create_collection(collection)?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    /// The currently bound collection, if any.
    pub fn collection(&self) -> Option<Collection> {
        self.collection.lock().ok().and_then(|c| c.clone())
    }

    pub fn init_client(&self) -> bool {
        match self.try_init_client() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %self.root.display(), error = %e, "vector store client init failed");
                false
            }
        }
    }

    /// Open the database under the storage directory, creating both if absent.
    /// A no-op once connected.
    pub fn try_init_client(&self) -> RagResult<()> {
        let mut guard = lock(&self.conn)?;
        if guard.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.root)?;
        load_sqlite_vec();

        let path = self.db_path();
        let conn = Connection::open(&path).map_err(|e| {
            RagError::StoreWriteFailure(format!("failed to open {}: {e}", path.display()))
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init_schema(&conn)?;

        tracing::info!(path = %path.display(), "vector store client initialized");
        *guard = Some(conn);
        Ok(())
    }

    /// Bind the named collection, creating it if it does not exist yet. A failed
    /// lookup is treated as "absent" and falls through to creation.
    pub fn get_or_create_collection(&self, name: &str) -> RagResult<Collection> {
        let collection = {
            let guard = lock(&self.conn)?;
            let conn = guard
                .as_ref()
                .ok_or(RagError::NotInitialized("vector store client"))?;

            match find_collection(conn, name) {
                Ok(Some(existing)) => {
                    tracing::info!(collection = %name, "using existing collection");
                    existing
                }
                Ok(None) => create_collection(conn, name)?,
                Err(e) => {
                    tracing::debug!(collection = %name, error = %e, "collection lookup failed, creating");
                    create_collection(conn, name)?
                }
            }
        };

        *lock(&self.collection)? = Some(collection.clone());
        Ok(collection)
    }

    fn bound_collection(&self) -> RagResult<Collection> {
        lock(&self.collection)?
            .clone()
            .ok_or(RagError::NotInitialized("collection"))
    }

    /// Write N parallel records, returning `false` on any failure.
    pub fn upsert(
        &self,
        ids: &[String],
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: Option<&[Metadata]>,
    ) -> bool {
        match self.try_upsert(ids, texts, embeddings, metadatas) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to store embeddings");
                false
            }
        }
    }

    /// Insert-or-overwrite N records keyed by id. `metadatas` defaults to empty
    /// maps. Lengths, dimensions and metadata are validated before anything is
    /// written, and the write itself is one transaction: either every record
    /// lands or none does. Returns the number of records written.
    pub fn try_upsert(
        &self,
        ids: &[String],
        texts: &[String],
        embeddings: &[Vec<f32>],
        metadatas: Option<&[Metadata]>,
    ) -> RagResult<usize> {
        let collection = self.bound_collection()?;

        let empty;
        let metadatas = match metadatas {
            Some(m) => m,
            None => {
                empty = vec![Metadata::new(); texts.len()];
                &empty[..]
            }
        };

        let n = ids.len();
        if texts.len() != n || embeddings.len() != n || metadatas.len() != n {
            return Err(RagError::LengthMismatch {
                ids: n,
                texts: texts.len(),
                embeddings: embeddings.len(),
                metadatas: metadatas.len(),
            });
        }
        if n == 0 {
            return Ok(0);
        }

        let dimension = embeddings[0].len();
        if dimension == 0 {
            return Err(RagError::EmbeddingFailure(format!(
                "empty embedding for id {}",
                ids[0]
            )));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }
        let metadata_json = metadatas
            .iter()
            .map(encode_metadata)
            .collect::<RagResult<Vec<_>>>()?;

        let mut guard = lock(&self.conn)?;
        let conn = guard
            .as_mut()
            .ok_or(RagError::NotInitialized("vector store client"))?;
        // Write lock up front; a deferred read-to-write upgrade fails with
        // SQLITE_BUSY without consulting the busy timeout.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let table = ensure_vec_table(&tx, &collection, dimension)?;
        let now = chrono::Utc::now().to_rfc3339();

        {
            let mut delete_vec = tx.prepare(&format!("DELETE FROM {table} WHERE id = ?1"))?;
            let mut insert_vec =
                tx.prepare(&format!("INSERT INTO {table} (id, embedding) VALUES (?1, ?2)"))?;
            let mut upsert_record = tx.prepare(
                "INSERT INTO records (collection_id, id, document, metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(collection_id, id) DO UPDATE SET \
                 document = excluded.document, metadata = excluded.metadata, created_at = excluded.created_at",
            )?;

            for i in 0..n {
                // vec0 has no upsert; replace the row instead.
                delete_vec.execute(params![ids[i]])?;
                insert_vec.execute(params![ids[i], embedding_to_bytes(&embeddings[i])])?;
                upsert_record.execute(params![
                    collection.id,
                    ids[i],
                    texts[i],
                    metadata_json[i],
                    now
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(collection = %collection.name, count = n, "stored embeddings");
        Ok(n)
    }

    /// Number of records in the bound collection.
    pub fn count(&self) -> RagResult<usize> {
        let collection = self.bound_collection()?;
        let guard = lock(&self.conn)?;
        let conn = guard
            .as_ref()
            .ok_or(RagError::NotInitialized("vector store client"))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE collection_id = ?1",
                params![collection.id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count as usize)
    }

    /// k-NN search that masks failures: any error is logged and an empty result
    /// returned, so "no matches" and "search failed" look the same here. Use
    /// [`try_query`](Self::try_query) to tell them apart.
    pub fn query(&self, embedding: &[f32], k: usize) -> QueryResult {
        self.try_query(embedding, k).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "similarity search failed; returning empty result");
            QueryResult::default()
        })
    }

    /// Up to `k` nearest records by L2 distance, closest first. A collection that
    /// has never been written to yields an empty result.
    pub fn try_query(&self, embedding: &[f32], k: usize) -> RagResult<QueryResult> {
        let collection = self.bound_collection()?;
        if k == 0 {
            return Ok(QueryResult::default());
        }

        let guard = lock(&self.conn)?;
        let conn = guard
            .as_ref()
            .ok_or(RagError::NotInitialized("vector store client"))?;

        let dimension: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM collections WHERE id = ?1",
                params![collection.id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        let Some(dimension) = dimension else {
            return Ok(QueryResult::default());
        };
        if embedding.len() != dimension as usize {
            return Err(RagError::DimensionMismatch {
                expected: dimension as usize,
                actual: embedding.len(),
            });
        }

        let table = schema::vec_table_name(collection.id);
        let mut knn = conn
            .prepare(&format!(
                "SELECT id, distance FROM {table} \
                 WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2"
            ))
            .map_err(query_err)?;
        let hits = knn
            .query_map(
                params![embedding_to_bytes(embedding), k.min(MAX_K) as i64],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        let mut lookup = conn
            .prepare("SELECT document, metadata FROM records WHERE collection_id = ?1 AND id = ?2")
            .map_err(query_err)?;

        let mut result = QueryResult::default();
        for (id, distance) in hits {
            let row: Option<(String, String)> = lookup
                .query_row(params![collection.id, id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()
                .map_err(query_err)?;
            let Some((document, metadata)) = row else {
                tracing::warn!(id = %id, "vector has no matching record, skipping");
                continue;
            };
            result.documents.push(document);
            result.distances.push(distance);
            result.ids.push(id);
            result.metadatas.push(decode_metadata(&metadata));
        }

        Ok(result)
    }

    /// Fetch records by id from the bound collection, in input order. Unknown ids
    /// are skipped.
    pub fn get(&self, ids: &[String]) -> RagResult<Vec<StoredRecord>> {
        let collection = self.bound_collection()?;
        let guard = lock(&self.conn)?;
        let conn = guard
            .as_ref()
            .ok_or(RagError::NotInitialized("vector store client"))?;

        let mut stmt = conn
            .prepare(
                "SELECT document, metadata, created_at FROM records \
                 WHERE collection_id = ?1 AND id = ?2",
            )
            .map_err(query_err)?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let row: Option<(String, String, String)> = stmt
                .query_row(params![collection.id, id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .optional()
                .map_err(query_err)?;
            if let Some((text, metadata, created_at)) = row {
                records.push(StoredRecord {
                    id: id.clone(),
                    text,
                    metadata: decode_metadata(&metadata),
                    created_at,
                });
            }
        }
        Ok(records)
    }

    /// All collections in the database with their record counts.
    pub fn list_collections(&self) -> RagResult<Vec<CollectionInfo>> {
        let guard = lock(&self.conn)?;
        let conn = guard
            .as_ref()
            .ok_or(RagError::NotInitialized("vector store client"))?;

        let mut stmt = conn
            .prepare(
                "SELECT c.name, c.dimension, COUNT(r.id) FROM collections c \
                 LEFT JOIN records r ON r.collection_id = c.id \
                 GROUP BY c.id ORDER BY c.name",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CollectionInfo {
                    name: row.get(0)?,
                    dimension: row.get::<_, Option<i64>>(1)?.map(|d| d as usize),
                    count: row.get::<_, i64>(2)? as usize,
                })
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        Ok(rows)
    }
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("root", &self.root)
            .field("collection", &self.collection())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> RagResult<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| RagError::StoreWriteFailure("vector store lock poisoned".into()))
}

fn query_err(e: rusqlite::Error) -> RagError {
    RagError::StoreQueryFailure(e.to_string())
}

fn find_collection(conn: &Connection, name: &str) -> rusqlite::Result<Option<Collection>> {
    conn.query_row(
        "SELECT id FROM collections WHERE name = ?1",
        params![name],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|id| {
        id.map(|id| Collection {
            id,
            name: name.to_string(),
        })
    })
}

fn create_collection(conn: &Connection, name: &str) -> RagResult<Collection> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
        params![name, now],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM collections WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    tracing::info!(collection = %name, "created new collection");
    Ok(Collection {
        id,
        name: name.to_string(),
    })
}

/// Make sure the collection's vec0 table exists with `dimension`, pinning the
/// dimension on first write. Returns the table name.
fn ensure_vec_table(
    tx: &Transaction,
    collection: &Collection,
    dimension: usize,
) -> RagResult<String> {
    let stored: Option<Option<i64>> = tx
        .query_row(
            "SELECT dimension FROM collections WHERE id = ?1",
            params![collection.id],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        None => {
            return Err(RagError::StoreWriteFailure(format!(
                "collection {} no longer exists",
                collection.name
            )))
        }
        Some(Some(expected)) if expected as usize != dimension => {
            return Err(RagError::DimensionMismatch {
                expected: expected as usize,
                actual: dimension,
            })
        }
        Some(Some(_)) => {}
        Some(None) => {
            tx.execute_batch(&schema::vec_table_sql(collection.id, dimension))?;
            tx.execute(
                "UPDATE collections SET dimension = ?1 WHERE id = ?2",
                params![dimension as i64, collection.id],
            )?;
            tracing::debug!(collection = %collection.name, dimension, "vector table created");
        }
    }

    Ok(schema::vec_table_name(collection.id))
}

fn encode_metadata(metadata: &Metadata) -> RagResult<String> {
    for (key, value) in metadata {
        if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
            return Err(RagError::InvalidMetadata(format!(
                "value for {key:?} must be a string, number or bool"
            )));
        }
    }
    serde_json::to_string(metadata).map_err(|e| RagError::InvalidMetadata(e.to_string()))
}

fn decode_metadata(raw: &str) -> Metadata {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "stored metadata is not a JSON object");
        Metadata::new()
    })
}
