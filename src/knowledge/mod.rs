//! Persistent passage index for retrieval-augmented answers.
//!
//! Passages live in one SQLite file next to their embedding (little-endian
//! `f32` blob) and a SHA-256 content hash that deduplicates re-ingested text
//! per embedder, so switching embedders re-indexes the same documents.
//! Search embeds the query and ranks every stored passage by cosine
//! similarity, keeping those at or above the score threshold.
//!
//! SQLite calls are blocking and run on the blocking thread pool.

pub mod embedding;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use text_splitter::MarkdownSplitter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::KnowledgeConfig;
use crate::error::AppError;
use embedding::{EmbeddingError, EmbeddingProvider, cosine};

const SCHEMA_VERSION: i64 = 2;
const INGEST_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("store: {0}")]
    Store(String),
}

impl From<KnowledgeError> for AppError {
    fn from(e: KnowledgeError) -> Self {
        AppError::Knowledge(e.to_string())
    }
}

/// A retrieved passage with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub source: String,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub files: usize,
    pub chunks: usize,
    pub inserted: usize,
}

impl IngestStats {
    pub fn duplicates(&self) -> usize {
        self.chunks - self.inserted
    }
}

#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    db_path: PathBuf,
    embedder: EmbeddingProvider,
    score_threshold: f32,
    top_k: usize,
    chunk_size: usize,
}

impl KnowledgeStore {
    /// Open (creating if needed) the store at `config.db_path`.
    pub fn open(config: &KnowledgeConfig, embedder: EmbeddingProvider) -> Result<Self, AppError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Knowledge(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let store = Self {
            db_path: config.db_path.clone(),
            embedder,
            score_threshold: config.score_threshold,
            top_k: config.top_k,
            chunk_size: config.chunk_size,
        };
        init_db(&store.db_path)?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn embedder(&self) -> &EmbeddingProvider {
        &self.embedder
    }

    /// Passages stored for the active embedder.
    pub async fn count(&self) -> Result<usize, KnowledgeError> {
        let model_id = self.embedder.model_id();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM passages WHERE embedder = ?1",
                params![model_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(|e| KnowledgeError::Store(format!("count passages: {e}")))
        })
        .await
    }

    /// Split `text` with the Markdown-aware splitter and index each chunk.
    /// Chunks already stored for the active embedder are skipped.
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<IngestStats, KnowledgeError> {
        let splitter = MarkdownSplitter::new(self.chunk_size);
        let chunks: Vec<(usize, String)> = splitter
            .chunk_indices(text)
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(pos, t)| (pos, t.trim().to_string()))
            .collect();
        let mut stats = IngestStats { files: 1, chunks: chunks.len(), inserted: 0 };
        if chunks.is_empty() {
            return Ok(stats);
        }

        let model_id = self.embedder.model_id();
        let hashes: Vec<String> = chunks.iter().map(|(_, t)| sha256_hex(t)).collect();
        let known = {
            let hashes = hashes.clone();
            let model_id = model_id.clone();
            self.with_conn(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT 1 FROM passages WHERE content_hash = ?1 AND embedder = ?2")
                    .map_err(|e| KnowledgeError::Store(format!("prepare hash lookup: {e}")))?;
                hashes
                    .iter()
                    .map(|h| {
                        stmt.query_row(params![h, model_id], |_| Ok(()))
                            .optional()
                            .map(|found| found.is_some())
                            .map_err(|e| KnowledgeError::Store(format!("hash lookup: {e}")))
                    })
                    .collect::<Result<Vec<bool>, _>>()
            })
            .await?
        };

        let fresh: Vec<(usize, String, String)> = chunks
            .into_iter()
            .zip(hashes)
            .zip(known)
            .filter(|(_, known)| !known)
            .map(|(((pos, text), hash), _)| (pos, text, hash))
            .collect();
        if fresh.is_empty() {
            debug!(source, "all chunks already indexed");
            return Ok(stats);
        }

        let texts: Vec<String> = fresh.iter().map(|(_, t, _)| t.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let source = source.to_string();

        stats.inserted = self
            .with_conn(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(|e| KnowledgeError::Store(format!("begin ingest tx: {e}")))?;
                let mut inserted = 0;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT OR IGNORE INTO passages
                             (id, source, position, content, content_hash, embedding, dims, embedder, created_at)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        )
                        .map_err(|e| KnowledgeError::Store(format!("prepare insert: {e}")))?;
                    for ((pos, text, hash), vector) in fresh.into_iter().zip(vectors) {
                        inserted += stmt
                            .execute(params![
                                uuid::Uuid::now_v7().to_string(),
                                source,
                                pos as i64,
                                text,
                                hash,
                                vector_to_blob(&vector),
                                vector.len() as i64,
                                model_id,
                                now_iso8601(),
                            ])
                            .map_err(|e| KnowledgeError::Store(format!("insert passage: {e}")))?;
                    }
                }
                tx.commit()
                    .map_err(|e| KnowledgeError::Store(format!("commit ingest: {e}")))?;
                Ok(inserted)
            })
            .await?;

        Ok(stats)
    }

    /// Ingest every `.md`/`.markdown`/`.txt` file under `dir`, recursively.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestStats, AppError> {
        let mut files = Vec::new();
        collect_files(dir, &mut files)?;
        files.sort();

        let mut total = IngestStats::default();
        for path in files {
            let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                AppError::Knowledge(format!("cannot read {}: {e}", path.display()))
            })?;
            let source = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .display()
                .to_string();
            let stats = self.ingest_text(&source, &text).await?;
            info!(
                source = %source,
                chunks = stats.chunks,
                inserted = stats.inserted,
                "ingested document"
            );
            total.files += 1;
            total.chunks += stats.chunks;
            total.inserted += stats.inserted;
        }
        Ok(total)
    }

    /// Passages scoring at least the threshold, best first, at most `top_k`.
    /// An empty index or a blank query yields an empty list.
    pub async fn search(&self, query: &str) -> Result<Vec<Passage>, KnowledgeError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("no vector for query".into()))?;
        let model_id = self.embedder.model_id();
        let threshold = self.score_threshold;
        let top_k = self.top_k;

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT source, content, embedding FROM passages WHERE embedder = ?1")
                .map_err(|e| KnowledgeError::Store(format!("prepare search: {e}")))?;
            let rows = stmt
                .query_map(params![model_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })
                .map_err(|e| KnowledgeError::Store(format!("query search: {e}")))?;

            let mut hits = Vec::new();
            for row in rows {
                let (source, content, blob) =
                    row.map_err(|e| KnowledgeError::Store(format!("read search row: {e}")))?;
                let Some(vector) = blob_to_vector(&blob) else {
                    warn!(source = %source, "skipping passage with corrupt embedding");
                    continue;
                };
                let score = cosine(&query_vec, &vector);
                if score >= threshold {
                    hits.push(Passage { source, content, score });
                }
            }
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(top_k);
            Ok(hits)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, KnowledgeError>
    where
        F: FnOnce(&mut Connection) -> Result<T, KnowledgeError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_conn(&path).map_err(|e| KnowledgeError::Store(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| KnowledgeError::Store(format!("blocking task failed: {e}")))?
    }
}

const PASSAGES_TABLE: &str = "
    CREATE TABLE passages (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        position INTEGER NOT NULL,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        embedding BLOB NOT NULL,
        dims INTEGER NOT NULL,
        embedder TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(content_hash, embedder)
    );
    CREATE INDEX passages_embedder ON passages(embedder);
";

fn init_db(path: &Path) -> Result<(), AppError> {
    let conn = open_conn(path)?;
    let version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .map_err(|e| AppError::Knowledge(format!("read schema version: {e}")))?;

    match version {
        0 => conn
            .execute_batch(&format!("BEGIN; {PASSAGES_TABLE} PRAGMA user_version = {SCHEMA_VERSION}; COMMIT;"))
            .map_err(|e| AppError::Knowledge(format!("initialize schema: {e}")))?,
        // v1 keyed passages on content_hash alone.
        1 => {
            info!(path = %path.display(), "migrating knowledge schema 1 -> 2");
            conn.execute_batch(&format!(
                "BEGIN;
                 DROP INDEX IF EXISTS passages_embedder;
                 ALTER TABLE passages RENAME TO passages_v1;
                 {PASSAGES_TABLE}
                 INSERT INTO passages SELECT * FROM passages_v1;
                 DROP TABLE passages_v1;
                 PRAGMA user_version = {SCHEMA_VERSION};
                 COMMIT;"
            ))
            .map_err(|e| AppError::Knowledge(format!("migrate schema: {e}")))?
        }
        SCHEMA_VERSION => {}
        other => {
            return Err(AppError::Knowledge(format!(
                "unsupported schema version {other} in {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn open_conn(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path)
        .map_err(|e| AppError::Knowledge(format!("open {}: {e}", path.display())))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Knowledge(format!("set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Knowledge(format!("set busy_timeout: {e}")))?;
    Ok(conn)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::Knowledge(format!("cannot list {}: {e}", dir.display())))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| INGEST_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        {
            out.push(path);
        }
    }
    Ok(())
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn sha256_hex(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
