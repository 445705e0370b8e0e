//! Vector store: a SQLite-backed nearest-neighbor index over embedded
//! corpus text. ChromaDB (the original's backing store) has no Rust
//! equivalent in this workspace's dependency stack, so this reuses
//! `embeddings.rs`'s BLOB-encoded-vector-plus-cosine-similarity idiom,
//! scoped to the `VectorHit` shape instead of principle rows.
//!
//! Grounded on `vector_store.py`'s `VectorStore`/`VectorSearchResult`.

use crate::error::{EngineError, EngineResult};
use crate::retrieval::embedder::LocalEmbedder;
use crate::types::{VectorHit, VectorSourceType};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vector_entries (
    source_type   TEXT NOT NULL,
    source_id     TEXT NOT NULL,
    source_url    TEXT,
    node_id       TEXT,
    node_label    TEXT,
    title         TEXT NOT NULL,
    text          TEXT NOT NULL,
    embedding     BLOB NOT NULL,
    collected_at  TEXT,
    collector     TEXT,
    PRIMARY KEY (source_type, source_id)
);
";

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, hit: VectorHit, embedding: Vec<f32>) -> EngineResult<()>;
    async fn query(&self, embedding: &[f32], top_k: usize) -> EngineResult<Vec<VectorHit>>;
    async fn count(&self) -> EngineResult<usize>;
    fn is_available(&self) -> bool;
}

pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Configuration(format!("creating data dir: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Configuration(format!("opening vector store: {e}")))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| EngineError::Configuration(format!("initializing vector schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn encode(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn decode(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn source_type_str(kind: VectorSourceType) -> &'static str {
        match kind {
            VectorSourceType::KgNode => "kg_node",
            VectorSourceType::WebSearch => "web_search",
            VectorSourceType::Paper => "paper",
            VectorSourceType::UserNote => "user_note",
        }
    }

    fn parse_source_type(s: &str) -> VectorSourceType {
        match s {
            "web_search" => VectorSourceType::WebSearch,
            "paper" => VectorSourceType::Paper,
            "user_note" => VectorSourceType::UserNote,
            _ => VectorSourceType::KgNode,
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, hit: VectorHit, embedding: Vec<f32>) -> EngineResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Retrieval("vector store lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO vector_entries
                (source_type, source_id, source_url, node_id, node_label, title, text, embedding, collected_at, collector)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(source_type, source_id) DO UPDATE SET
                source_url = excluded.source_url,
                node_id = excluded.node_id,
                node_label = excluded.node_label,
                title = excluded.title,
                text = excluded.text,
                embedding = excluded.embedding,
                collected_at = excluded.collected_at,
                collector = excluded.collector",
            params![
                Self::source_type_str(hit.source_type),
                hit.source_id,
                hit.source_url,
                hit.node_id,
                hit.node_label,
                hit.title,
                hit.text,
                Self::encode(&embedding),
                hit.collected_at,
                hit.collector,
            ],
        )
        .map_err(|e| EngineError::Retrieval(format!("vector upsert failed: {e}")))?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> EngineResult<Vec<VectorHit>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Retrieval("vector store lock poisoned".to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT source_type, source_id, source_url, node_id, node_label, title, text, embedding, collected_at, collector
                 FROM vector_entries",
            )
            .map_err(|e| EngineError::Retrieval(format!("preparing vector query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Vec<u8>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            })
            .map_err(|e| EngineError::Retrieval(format!("querying vector entries: {e}")))?;

        let mut scored: Vec<(f64, VectorHit)> = Vec::new();
        for row in rows {
            let (
                source_type,
                source_id,
                source_url,
                node_id,
                node_label,
                title,
                text,
                stored_embedding,
                collected_at,
                collector,
            ) = row.map_err(|e| EngineError::Retrieval(format!("reading vector row: {e}")))?;

            let stored = Self::decode(&stored_embedding);
            let score = LocalEmbedder::cosine_similarity(embedding, &stored) as f64;

            scored.push((
                score,
                VectorHit {
                    source_type: Self::parse_source_type(&source_type),
                    source_id,
                    source_url,
                    node_id,
                    node_label,
                    title,
                    text,
                    score,
                    collected_at,
                    collector,
                },
            ));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }

    async fn count(&self) -> EngineResult<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| EngineError::Retrieval("vector store lock poisoned".to_string()))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vector_entries", [], |row| row.get(0))
            .map_err(|e| EngineError::Retrieval(format!("counting vector entries: {e}")))?;
        Ok(count as usize)
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hit(source_id: &str) -> VectorHit {
        VectorHit {
            source_type: VectorSourceType::KgNode,
            source_id: source_id.to_string(),
            source_url: None,
            node_id: Some(format!("m:{source_id}")),
            node_label: Some("Method".to_string()),
            title: "ReAct".to_string(),
            text: "Reasoning and acting interleaved".to_string(),
            score: 0.0,
            collected_at: None,
            collector: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_query_returns_closest_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("vectors.db")).unwrap();

        store
            .upsert(sample_hit("a"), vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .upsert(sample_hit("b"), vec![0.0, 1.0, 0.0])
            .await
            .unwrap();

        let results = store.query(&[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id, "a");
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_source_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(&dir.path().join("vectors.db")).unwrap();

        store
            .upsert(sample_hit("a"), vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        store
            .upsert(sample_hit("a"), vec![1.0, 0.0, 0.0])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
    }
}
