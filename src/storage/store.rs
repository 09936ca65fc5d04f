//! SQLite document store.
//!
//! Persists documents, chunks with their embedding vectors, ingest jobs,
//! and relations. Chunk vectors are stored as little-endian f32 blobs and
//! ranked in-process by cosine similarity; lexical ranking uses FTS5 BM25.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in the target types.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::core::{Document, DocumentStatus, IngestJob, JobStatus, StageLog};
use crate::embedding::cosine_similarity;
use crate::error::StorageError;
use crate::storage::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
    get_migrations_from,
};

type Result<T> = std::result::Result<T, StorageError>;

/// A persisted chunk joined with its document, as returned by searches.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Chunk id.
    pub id: i64,
    /// Owning document id.
    pub document_id: i64,
    /// 0-based index within the document.
    pub chunk_index: usize,
    /// Chunk content (post-masking).
    pub content: String,
    /// Chunk metadata.
    pub metadata: Value,
    /// Owning document filename.
    pub filename: String,
}

/// Aggregate store statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    /// Number of documents.
    pub document_count: usize,
    /// Number of persisted chunks.
    pub chunk_count: usize,
    /// Number of ingest jobs.
    pub job_count: usize,
    /// Schema version.
    pub schema_version: u32,
    /// Database file size in bytes (None for in-memory).
    pub db_size: Option<u64>,
}

/// SQLite-backed persistence for the engine.
pub struct DocumentStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl DocumentStore {
    /// Opens or creates a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        // WAL improves concurrent read behavior
        let _: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Creates an in-memory database, used in tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        Ok(Self { conn, path: None })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Initializes the schema, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error on schema or migration failure.
    pub fn init(&mut self) -> Result<()> {
        let is_init: i64 = self.conn.query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))?;

        if is_init == 0 {
            self.conn.execute_batch(SCHEMA_SQL)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        } else if let Some(current) = self.schema_version()?
            && current < CURRENT_SCHEMA_VERSION
        {
            for migration in get_migrations_from(current) {
                self.conn
                    .execute_batch(migration.sql)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
            }
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        }

        Ok(())
    }

    /// Whether the schema has been initialized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check query fails.
    pub fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Drops all data, keeping the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    pub fn reset(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r"
            DELETE FROM document_chunks;
            DELETE FROM document_relations;
            DELETE FROM ingest_jobs;
            DELETE FROM documents;
        ",
        )?;
        Ok(())
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()?;
        Ok(version.and_then(|v| v.parse().ok()))
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute(SET_VERSION_SQL, params![version.to_string()])?;
        Ok(())
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    // ==================== Document Operations ====================

    /// Creates a document row in `pending` state.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_document(
        &mut self,
        filename: &str,
        mime: Option<&str>,
        size: u64,
        owner_id: i64,
    ) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO documents (filename, mime, size, owner_id, status, metadata, created_at)
            VALUES (?, ?, ?, ?, 'pending', '{}', ?)
            ",
            params![filename, mime, size as i64, owner_id, Self::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Fetches a document scoped to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_document(&self, id: i64, owner_id: i64) -> Result<Option<Document>> {
        self.conn
            .query_row(
                r"
                SELECT id, filename, mime, size, owner_id, status, metadata, created_at
                FROM documents WHERE id = ? AND owner_id = ?
                ",
                params![id, owner_id],
                Self::map_document,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Lists an owner's documents, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_documents(&self, owner_id: i64) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, filename, mime, size, owner_id, status, metadata, created_at
            FROM documents WHERE owner_id = ? ORDER BY id DESC
            ",
        )?;

        let docs = stmt
            .query_map(params![owner_id], Self::map_document)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    fn map_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        let status: String = row.get(5)?;
        let metadata: String = row.get(6)?;
        Ok(Document {
            id: row.get(0)?,
            filename: row.get(1)?,
            mime: row.get(2)?,
            size: row.get::<_, i64>(3)? as u64,
            owner_id: row.get(4)?,
            status: DocumentStatus::parse(&status),
            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            created_at: row.get(7)?,
        })
    }

    /// Advances a document's lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn set_document_status(&mut self, id: i64, status: DocumentStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE documents SET status = ? WHERE id = ?",
            params![status.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::DocumentNotFound { id });
        }
        Ok(())
    }

    /// Merges keys into a document's metadata JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is missing or the update fails.
    pub fn merge_document_metadata(
        &mut self,
        id: i64,
        updates: &serde_json::Map<String, Value>,
    ) -> Result<()> {
        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT metadata FROM documents WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Err(StorageError::DocumentNotFound { id });
        };

        let mut metadata: serde_json::Map<String, Value> =
            serde_json::from_str(&current).unwrap_or_default();
        for (key, value) in updates {
            metadata.insert(key.clone(), value.clone());
        }

        let serialized = serde_json::to_string(&metadata)?;
        self.conn.execute(
            "UPDATE documents SET metadata = ? WHERE id = ?",
            params![serialized, id],
        )?;
        Ok(())
    }

    /// Deletes a document; chunks, jobs, and relations cascade.
    ///
    /// Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_document(&mut self, id: i64, owner_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM documents WHERE id = ? AND owner_id = ?",
            params![id, owner_id],
        )?;
        Ok(deleted > 0)
    }

    /// Deletes all of an owner's documents. Returns the count removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_all_documents(&mut self, owner_id: i64) -> Result<usize> {
        let deleted = self
            .conn
            .execute("DELETE FROM documents WHERE owner_id = ?", params![owner_id])?;
        Ok(deleted)
    }

    // ==================== Job Operations ====================

    /// Creates a running ingest job for a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn create_job(&mut self, document_id: i64) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO ingest_jobs (document_id, status, logs, started_at)
            VALUES (?, 'running', '[]', ?)
            ",
            params![document_id, Self::now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Closes a job with its final status and the run's log snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is missing or the update fails.
    pub fn finish_job(
        &mut self,
        job_id: i64,
        status: JobStatus,
        logs: &[StageLog],
        error: Option<&str>,
    ) -> Result<()> {
        let logs_json = serde_json::to_string(logs)?;
        let changed = self.conn.execute(
            r"
            UPDATE ingest_jobs
            SET status = ?, logs = ?, error = ?, completed_at = ?
            WHERE id = ?
            ",
            params![status.as_str(), logs_json, error, Self::now(), job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound { id: job_id });
        }
        Ok(())
    }

    /// Fetches a job by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_job(&self, id: i64) -> Result<Option<IngestJob>> {
        self.conn
            .query_row(
                r"
                SELECT id, document_id, status, logs, error, started_at, completed_at
                FROM ingest_jobs WHERE id = ?
                ",
                params![id],
                Self::map_job,
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Lists jobs for a document, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn jobs_for_document(&self, document_id: i64) -> Result<Vec<IngestJob>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, document_id, status, logs, error, started_at, completed_at
            FROM ingest_jobs WHERE document_id = ? ORDER BY id
            ",
        )?;
        let jobs = stmt
            .query_map(params![document_id], Self::map_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn map_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestJob> {
        let status: String = row.get(2)?;
        let logs: String = row.get(3)?;
        Ok(IngestJob {
            id: row.get(0)?,
            document_id: row.get(1)?,
            status: JobStatus::parse(&status),
            logs: serde_json::from_str(&logs).unwrap_or_default(),
            error: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
        })
    }

    // ==================== Chunk Operations ====================

    /// Inserts a document's chunks in a single transaction.
    ///
    /// Each entry is `(chunk_index, content, metadata, embedding)`. The
    /// transaction commits once per document; any failure rolls back.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] on commit failure.
    pub fn insert_chunks(
        &mut self,
        document_id: i64,
        chunks: &[(usize, String, Value, Vec<f32>)],
    ) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        let now = Self::now();

        {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO document_chunks
                    (document_id, chunk_index, content, metadata, embedding, dimensions, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for (index, content, metadata, embedding) in chunks {
                let bytes = embedding_to_bytes(embedding);
                let metadata_json = serde_json::to_string(metadata)?;
                stmt.execute(params![
                    document_id,
                    *index as i64,
                    content,
                    metadata_json,
                    bytes,
                    embedding.len() as i64,
                    now,
                ])?;
            }
        }

        tx.commit()
            .map_err(|e| StorageError::Transaction(e.to_string()))?;
        Ok(chunks.len())
    }

    /// Refreshes planner statistics on the chunk table. Best-effort.
    pub fn analyze_chunks(&self) {
        let _ = self.conn.execute_batch("ANALYZE document_chunks;");
    }

    /// Persisted chunk indices for a document, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chunk_indices(&self, document_id: i64) -> Result<Vec<usize>> {
        let mut stmt = self.conn.prepare(
            "SELECT chunk_index FROM document_chunks WHERE document_id = ? ORDER BY chunk_index",
        )?;
        let indices = stmt
            .query_map(params![document_id], |row| {
                Ok(row.get::<_, i64>(0)? as usize)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(indices)
    }

    /// Number of persisted chunks for a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chunk_count(&self, document_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM document_chunks WHERE document_id = ?",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Stored embedding for a chunk, used by invariants and tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chunk_embedding(&self, chunk_id: i64) -> Result<Option<Vec<f32>>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT embedding FROM document_chunks WHERE id = ?",
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(bytes.map(|b| bytes_to_embedding(&b)))
    }

    // ==================== Search Operations ====================

    /// Vector search over an owner's chunks.
    ///
    /// Ranks by cosine similarity descending; `similarity = 1 - distance`
    /// under the store's cosine-distance ordering.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails.
    pub fn vector_search(
        &self,
        embedding: &[f32],
        owner_id: i64,
        top_k: usize,
    ) -> Result<Vec<(ChunkRecord, f32)>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.filename, c.embedding
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.owner_id = ?
            ",
        )?;

        let mut scored: Vec<(ChunkRecord, f32)> = stmt
            .query_map(params![owner_id], |row| {
                let record = Self::map_chunk_record(row)?;
                let bytes: Vec<u8> = row.get(6)?;
                Ok((record, bytes))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(record, bytes)| {
                let stored = bytes_to_embedding(&bytes);
                let similarity = cosine_similarity(embedding, &stored);
                (record, similarity)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Lexical FTS5 search over an owner's chunks.
    ///
    /// BM25 scores are negated so higher means a better match.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub fn text_search(
        &self,
        query: &str,
        owner_id: i64,
        top_k: usize,
    ) -> Result<Vec<(ChunkRecord, f64)>> {
        // Quote each term so FTS5 operators in user queries are literals,
        // OR-joined for forgiving matching.
        let fts_query = query
            .split_whitespace()
            .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ");

        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            r"
            SELECT c.id, c.document_id, c.chunk_index, c.content, c.metadata,
                   d.filename, -bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN document_chunks c ON c.id = chunks_fts.rowid
            JOIN documents d ON d.id = c.document_id
            WHERE chunks_fts MATCH ? AND d.owner_id = ?
            ORDER BY score DESC
            LIMIT ?
            ",
        )?;

        let results = stmt
            .query_map(params![fts_query, owner_id, top_k as i64], |row| {
                let record = Self::map_chunk_record(row)?;
                let score: f64 = row.get(6)?;
                Ok((record, score))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(results)
    }

    fn map_chunk_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
        let metadata: String = row.get(4)?;
        Ok(ChunkRecord {
            id: row.get(0)?,
            document_id: row.get(1)?,
            chunk_index: row.get::<_, i64>(2)? as usize,
            content: row.get(3)?,
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            filename: row.get(5)?,
        })
    }

    // ==================== Utility Operations ====================

    /// Aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let document_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunk_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM document_chunks", [], |row| row.get(0))?;
        let job_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM ingest_jobs", [], |row| row.get(0))?;

        let db_size = self
            .path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok().map(|m| m.len()));

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            job_count: job_count as usize,
            schema_version: self.schema_version()?.unwrap_or(0),
            db_size,
        })
    }
}

/// Serializes an f32 vector to little-endian bytes.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserializes little-endian bytes back to an f32 vector.
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
