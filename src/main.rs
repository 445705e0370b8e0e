//! HTTP entry point: wires every collaborator from `Settings` and the
//! YAML config files into one `PipelineDeps` / `AppState`, then serves
//! the `api` router.
//!
//! Run with: cargo run
//! Offline prompt-optimization workflows live in `bin/optimizer_cli.rs`.

use kg_answer_engine::api::{build_router, AppState};
use kg_answer_engine::config::{
    load_yaml, CypherTemplatesConfig, EvaluationCriteriaConfig, IntentsConfig, ProvidersConfig,
    TestQueriesConfig,
};
use kg_answer_engine::critic::CriticEvaluator;
use kg_answer_engine::get_settings;
use kg_answer_engine::graph::GraphClient;
use kg_answer_engine::optimizer::{FailureAnalyzer, PromptRegistry, TestRunner, VariantGenerator};
use kg_answer_engine::pipeline::{intent_classifier, synthesizer, EntityCatalog, PipelineDeps};
use kg_answer_engine::providers::get_provider;
use kg_answer_engine::retrieval::{build_embedding_provider, SqliteVectorStore, TavilySearch};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = get_settings();
    std::fs::create_dir_all(&settings.data_dir)?;

    let providers_config: ProvidersConfig = load_yaml(&settings.config_dir, "providers.yaml")?;
    let intents_config: IntentsConfig = load_yaml(&settings.config_dir, "intents.yaml")?;
    let templates_config: CypherTemplatesConfig =
        load_yaml(&settings.config_dir, "cypher_templates.yaml")?;
    let eval_criteria: EvaluationCriteriaConfig =
        load_yaml(&settings.config_dir, "evaluation_criteria.yaml")?;
    let test_queries: TestQueriesConfig = load_yaml(&settings.config_dir, "test_queries.yaml")?;
    let entity_catalog: EntityCatalog = load_yaml(&settings.config_dir, "entity_catalog.yaml")?;

    let graph = GraphClient::connect(settings).await?;
    info!(database = graph.database(), "connected to graph database");

    let embedder = build_embedding_provider(settings)?;
    let vector_store: Arc<dyn kg_answer_engine::retrieval::VectorStore> =
        Arc::new(SqliteVectorStore::open(&settings.data_dir.join("vectors.db"))?);
    let web_search: Option<Arc<dyn kg_answer_engine::retrieval::WebSearchProvider>> =
        TavilySearch::from_env().map(|t| Arc::new(t) as Arc<_>);

    let llm = get_provider(settings, &providers_config).map(Arc::new);
    if llm.is_none() {
        info!("no LLM provider configured; classification and synthesis fall back to heuristics");
    }

    let prompt_registry = Arc::new(PromptRegistry::new(graph.clone(), settings.prompts_dir.clone()));
    prompt_registry
        .initialize_from_code("intent_classifier", intent_classifier::DEFAULT_INSTRUCTION)
        .await?;
    prompt_registry
        .initialize_from_code("synthesizer", synthesizer::DEFAULT_INSTRUCTION)
        .await?;

    let deps = Arc::new(PipelineDeps {
        graph: graph.clone(),
        embedder,
        vector_store,
        web_search,
        llm,
        intents_config,
        templates_config,
        entity_catalog,
        prompt_registry: Some(prompt_registry.clone()),
        prompt_overrides: Default::default(),
    });

    let evaluator = Arc::new(CriticEvaluator::new(eval_criteria.clone()));
    let analyzer = Arc::new(FailureAnalyzer::new(graph.clone()));
    let generator = Arc::new(VariantGenerator::new(prompt_registry.clone()));
    let runner = Arc::new(TestRunner::new(evaluator.clone()));

    let state = AppState {
        deps,
        settings: Arc::new(settings.clone()),
        providers_config: Arc::new(providers_config),
        graph,
        evaluator,
        eval_criteria: Arc::new(eval_criteria),
        prompt_registry,
        analyzer,
        generator,
        runner,
        test_queries: Arc::new(test_queries),
    };

    let app = build_router(state);

    let addr = std::env::var("ENGINE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
