//! The five-stage retrieval pipeline: intent classification, search
//! planning, graph/vector retrieval, conditional web expansion, and
//! answer synthesis — chained over one `QueryContext` per query.
//!
//! Each stage is a suspension point (network call) bounded by its own
//! error handling; a stage failure is pushed as `StageOutcome::Failed`
//! and the pipeline proceeds rather than aborting the whole query,
//! mirroring `pipeline.py`'s try/except-per-node orchestration.

pub mod graph_retriever;
pub mod intent_classifier;
pub mod search_planner;
pub mod synthesizer;
pub mod web_expander;

pub use intent_classifier::EntityCatalog;

use crate::config::{CypherTemplatesConfig, IntentsConfig};
use crate::graph::GraphClient;
use crate::optimizer::PromptRegistry;
use crate::providers::ResolvedProvider;
use crate::retrieval::{EmbeddingProvider, VectorStore, WebSearchProvider};
use crate::types::{QueryContext, StageOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Everything a single pipeline run needs, held for the process lifetime
/// and shared across concurrent queries via `Arc`.
#[derive(Clone)]
pub struct PipelineDeps {
    pub graph: GraphClient,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStore>,
    pub web_search: Option<Arc<dyn WebSearchProvider>>,
    pub llm: Option<Arc<ResolvedProvider>>,
    pub intents_config: IntentsConfig,
    pub templates_config: CypherTemplatesConfig,
    pub entity_catalog: EntityCatalog,
    /// Every agent's LLM call is routed through this registry rather
    /// than a hardcoded prompt constant, so the test runner can scope a
    /// candidate variant onto a run without mutating the active version.
    pub prompt_registry: Option<Arc<PromptRegistry>>,
    /// Per-run scoped overrides (`agent_name -> instruction text`),
    /// checked before falling back to the registry's active version.
    /// Set by `TestRunner` for the duration of one test suite run.
    pub prompt_overrides: HashMap<String, String>,
}

impl PipelineDeps {
    /// Clone of `self` with `agent_name`'s prompt scoped to `instruction`
    /// for the lifetime of the returned value — used by the test runner
    /// to exercise a candidate variant without touching the registry.
    pub fn with_prompt_override(&self, agent_name: &str, instruction: &str) -> Self {
        let mut overrides = self.prompt_overrides.clone();
        overrides.insert(agent_name.to_string(), instruction.to_string());
        Self {
            prompt_overrides: overrides,
            ..self.clone()
        }
    }

    /// Resolve the effective instruction for `agent_name`: the scoped
    /// override if present, else the registry's active version, else
    /// `None` (caller falls back to its own compiled-in default).
    async fn resolve_instruction(&self, agent_name: &str) -> Option<String> {
        if let Some(instruction) = self.prompt_overrides.get(agent_name) {
            return Some(instruction.clone());
        }
        match &self.prompt_registry {
            Some(registry) => registry.load_prompt(agent_name).await.ok().flatten(),
            None => None,
        }
    }
}

#[instrument(skip(deps), fields(query = %query))]
pub async fn run_pipeline(query: &str, deps: &PipelineDeps) -> QueryContext {
    let mut ctx = QueryContext::new(query);

    let classifier_instruction = deps.resolve_instruction("intent_classifier").await;
    let (intent, entities) = intent_classifier::classify(
        query,
        deps.llm.as_deref(),
        &deps.intents_config,
        &deps.entity_catalog,
        classifier_instruction.as_deref(),
    )
    .await;
    ctx.push(StageOutcome::IntentClassified {
        intent,
        entities: entities.clone(),
    });

    let strategy = search_planner::plan(intent, &entities, query, &deps.templates_config);
    ctx.push(StageOutcome::Planned {
        strategy: strategy.clone(),
    });

    let (graph_results, vector_results, result_counts) =
        match graph_retriever::retrieve(&strategy, &deps.graph, &deps.embedder, &deps.vector_store).await {
            Ok(evidence) => {
                let counts = (evidence.graph_results.len(), evidence.vector_results.len());
                ctx.push(StageOutcome::Retrieved {
                    graph_results: evidence.graph_results.clone(),
                    vector_results: evidence.vector_results.clone(),
                    cypher_executed: evidence.cypher_executed.clone(),
                });
                (evidence.graph_results, evidence.vector_results, counts)
            }
            Err(e) => {
                ctx.push(StageOutcome::Failed {
                    stage: "graph_retriever".to_string(),
                    error: e.to_string(),
                });
                (Vec::new(), Vec::new(), (0, 0))
            }
        };

    let web_results = if let Some(web_search) = &deps.web_search {
        if web_expander::should_expand(intent, result_counts.0, result_counts.1) {
            match web_expander::expand(query, web_search, &deps.embedder, &deps.vector_store).await {
                web_expander::WebExpansionOutcome::Results(hits) => {
                    ctx.push(StageOutcome::WebExpanded {
                        web_results: hits.clone(),
                    });
                    hits
                }
                web_expander::WebExpansionOutcome::Skipped { reason } => {
                    ctx.push(StageOutcome::Skipped {
                        stage: "web_expander".to_string(),
                        reason,
                    });
                    Vec::new()
                }
            }
        } else {
            ctx.push(StageOutcome::Skipped {
                stage: "web_expander".to_string(),
                reason: "sufficient corpus evidence already retrieved".to_string(),
            });
            Vec::new()
        }
    } else {
        ctx.push(StageOutcome::Skipped {
            stage: "web_expander".to_string(),
            reason: "no web search provider configured".to_string(),
        });
        Vec::new()
    };

    let synthesizer_instruction = deps.resolve_instruction("synthesizer").await;
    let result = synthesizer::synthesize(
        query,
        intent,
        &entities,
        &graph_results,
        &vector_results,
        &web_results,
        ctx.error(),
        deps.llm.as_deref(),
        synthesizer_instruction.as_deref(),
    )
    .await;

    ctx.push(StageOutcome::Synthesized {
        answer: result.answer,
        sources: result.sources,
        confidence: result.confidence,
    });

    ctx
}
