//! Web Expander: conditional web-search fallback, run only when the
//! corpus evidence looks thin or the query explicitly asks for recent
//! material. Grounded on `web_search.py`'s skip-unless-needed gate.

use crate::retrieval::{url_fingerprint, EmbeddingProvider, VectorStore, WebSearchProvider};
use crate::types::{Intent, VectorHit, VectorSourceType};
use std::sync::Arc;
use tracing::{instrument, warn};

const MAX_WEB_RESULTS: usize = 5;

pub enum WebExpansionOutcome {
    Skipped { reason: String },
    Results(Vec<VectorHit>),
}

/// Whether the web expansion stage should run at all: the query asks for
/// recent/future material (`Intent::Expansion`), or graph+vector
/// retrieval came back empty.
pub fn should_expand(intent: Intent, graph_result_count: usize, vector_result_count: usize) -> bool {
    intent == Intent::Expansion || (graph_result_count == 0 && vector_result_count == 0)
}

#[instrument(skip(web_search, embedder, vector_store))]
pub async fn expand(
    query: &str,
    web_search: &Arc<dyn WebSearchProvider>,
    embedder: &Arc<dyn EmbeddingProvider>,
    vector_store: &Arc<dyn VectorStore>,
) -> WebExpansionOutcome {
    let results = match web_search.search(query, MAX_WEB_RESULTS).await {
        Ok(results) => results,
        Err(e) => {
            warn!(error = %e, "web search failed, continuing without web evidence");
            return WebExpansionOutcome::Skipped {
                reason: format!("web search unavailable: {e}"),
            };
        }
    };

    let mut hits = Vec::with_capacity(results.len());
    for result in results {
        let fingerprint = url_fingerprint(&result.url);
        let hit = VectorHit {
            source_type: VectorSourceType::WebSearch,
            source_id: fingerprint,
            source_url: Some(result.url.clone()),
            node_id: None,
            node_label: None,
            title: result.title.clone(),
            text: result.content.clone(),
            score: result.score,
            collected_at: None,
            collector: Some("web_expander".to_string()),
        };

        match embedder.embed(&result.content).await {
            Ok(embedding) => {
                if let Err(e) = vector_store.upsert(hit.clone(), embedding).await {
                    warn!(error = %e, url = %result.url, "failed to persist web result to vector store");
                }
            }
            Err(e) => warn!(error = %e, url = %result.url, "failed to embed web result"),
        }

        hits.push(hit);
    }

    WebExpansionOutcome::Results(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_intent_always_triggers_web_search() {
        assert!(should_expand(Intent::Expansion, 10, 10));
    }

    #[test]
    fn empty_retrieval_triggers_web_search_regardless_of_intent() {
        assert!(should_expand(Intent::Lookup, 0, 0));
    }

    #[test]
    fn lookup_with_results_skips_web_search() {
        assert!(!should_expand(Intent::Lookup, 3, 0));
    }
}
