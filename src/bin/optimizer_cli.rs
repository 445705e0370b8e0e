//! Offline CLI for the prompt optimization loop: mine failure patterns,
//! approve one for work, generate and A/B test candidate prompts, then
//! gate promotion behind an explicit human `activate`/`rollback` call.
//!
//! Run with: cargo run --bin optimizer-cli -- <command> [args...]
//!   analyze [agent_name]
//!   patterns [status]
//!   approve-pattern <pattern_id>
//!   test <pattern_id> [num_variants]
//!   versions <agent_name> [limit]
//!   activate <agent_name> <version_id> <approved_by>
//!   rollback <agent_name> [to_version]

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
use kg_answer_engine::types::PatternStatus;
use std::sync::Arc;

struct Cli {
    analyzer: Arc<FailureAnalyzer>,
    generator: Arc<VariantGenerator>,
    runner: Arc<TestRunner>,
    prompt_registry: Arc<PromptRegistry>,
    deps: PipelineDeps,
    providers_config: ProvidersConfig,
    test_queries: TestQueriesConfig,
}

async fn build_cli() -> anyhow::Result<Cli> {
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
    let embedder = build_embedding_provider(settings)?;
    let vector_store: Arc<dyn kg_answer_engine::retrieval::VectorStore> =
        Arc::new(SqliteVectorStore::open(&settings.data_dir.join("vectors.db"))?);
    let web_search: Option<Arc<dyn kg_answer_engine::retrieval::WebSearchProvider>> =
        TavilySearch::from_env().map(|t| Arc::new(t) as Arc<_>);
    let llm = get_provider(settings, &providers_config).map(Arc::new);

    let prompt_registry = Arc::new(PromptRegistry::new(graph.clone(), settings.prompts_dir.clone()));
    prompt_registry
        .initialize_from_code("intent_classifier", intent_classifier::DEFAULT_INSTRUCTION)
        .await?;
    prompt_registry
        .initialize_from_code("synthesizer", synthesizer::DEFAULT_INSTRUCTION)
        .await?;

    let deps = PipelineDeps {
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
    };

    let evaluator = Arc::new(CriticEvaluator::new(eval_criteria));
    let analyzer = Arc::new(FailureAnalyzer::new(graph.clone()));
    let generator = Arc::new(VariantGenerator::new(prompt_registry.clone()));
    let runner = Arc::new(TestRunner::new(evaluator));

    Ok(Cli {
        analyzer,
        generator,
        runner,
        prompt_registry,
        deps,
        providers_config,
        test_queries,
    })
}

fn parse_status(raw: &str) -> Option<PatternStatus> {
    match raw {
        "detected" => Some(PatternStatus::Detected),
        "reviewing" => Some(PatternStatus::Reviewing),
        "addressing" => Some(PatternStatus::Addressing),
        "resolved" => Some(PatternStatus::Resolved),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("usage: optimizer-cli <analyze|patterns|approve-pattern|test|versions|activate|rollback> [args...]");
        std::process::exit(2);
    };

    let cli = build_cli().await?;
    let settings = get_settings();
    let provider = get_provider(settings, &cli.providers_config);

    match command.as_str() {
        "analyze" => {
            let agent_name = args.get(2).map(|s| s.as_str());
            let patterns = cli.analyzer.analyze(agent_name, provider.as_ref()).await?;
            println!("mined {} failure pattern(s)", patterns.len());
            for pattern in &patterns {
                println!(
                    "  {} [{}:{}] freq={} avg_score={:.2} status={:?}",
                    pattern.id, pattern.agent_name, pattern.criterion_id, pattern.frequency,
                    pattern.avg_score, pattern.status
                );
            }
        }
        "patterns" => {
            let status = args.get(2).and_then(|s| parse_status(s));
            let patterns = cli.analyzer.get_patterns(status, None).await?;
            for pattern in &patterns {
                println!(
                    "{} [{}:{}] freq={} avg_score={:.2} status={:?}",
                    pattern.id, pattern.agent_name, pattern.criterion_id, pattern.frequency,
                    pattern.avg_score, pattern.status
                );
            }
        }
        "approve-pattern" => {
            let Some(pattern_id) = args.get(2) else {
                eprintln!("usage: optimizer-cli approve-pattern <pattern_id>");
                std::process::exit(2);
            };
            cli.analyzer
                .update_pattern_status(pattern_id, PatternStatus::Reviewing)
                .await?;
            println!("pattern {pattern_id} moved to reviewing");
        }
        "test" => {
            let Some(pattern_id) = args.get(2) else {
                eprintln!("usage: optimizer-cli test <pattern_id> [num_variants]");
                std::process::exit(2);
            };
            let num_variants: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(3);
            let patterns = cli.analyzer.get_patterns(None, None).await?;
            let Some(pattern) = patterns.into_iter().find(|p| &p.id == pattern_id) else {
                eprintln!("unknown pattern: {pattern_id}");
                std::process::exit(1);
            };
            let variants = cli
                .generator
                .generate_variants(&pattern, num_variants, provider.as_ref())
                .await;
            if variants.is_empty() {
                eprintln!("no LLM provider available, or current prompt missing; cannot generate variants");
                std::process::exit(1);
            }
            let test_queries = TestRunner::load_test_queries(&cli.test_queries, &pattern.agent_name);
            let results = cli
                .runner
                .run_tests(&variants, &test_queries, &cli.deps, provider.as_ref())
                .await;
            for result in &results {
                println!(
                    "{}: delta={:.3} passed={}/{}",
                    result.variant.id, result.performance_delta, result.passed_count, result.test_queries_count
                );
                cli.generator
                    .apply_variant(
                        &result.variant,
                        result.performance_delta,
                        Some(serde_json::json!({
                            "scores": result.scores,
                            "baseline_scores": result.baseline_scores,
                        })),
                    )
                    .await?;
            }
        }
        "versions" => {
            let Some(agent_name) = args.get(2) else {
                eprintln!("usage: optimizer-cli versions <agent_name> [limit]");
                std::process::exit(2);
            };
            let limit: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(20);
            let history = cli.prompt_registry.get_version_history(agent_name, limit).await?;
            for version in &history {
                println!(
                    "{} v{} active={} approved={} delta={:.3}",
                    version.id, version.version, version.is_active, version.user_approved, version.performance_delta
                );
            }
        }
        "activate" => {
            let (Some(agent_name), Some(version_id), Some(approved_by)) =
                (args.get(2), args.get(3), args.get(4))
            else {
                eprintln!("usage: optimizer-cli activate <agent_name> <version_id> <approved_by>");
                std::process::exit(2);
            };
            cli.prompt_registry
                .activate_version(agent_name, version_id, approved_by)
                .await?;
            println!("activated {version_id} for {agent_name}");
        }
        "rollback" => {
            let Some(agent_name) = args.get(2) else {
                eprintln!("usage: optimizer-cli rollback <agent_name> [to_version]");
                std::process::exit(2);
            };
            let to_version = args.get(3).map(|s| s.as_str());
            let version = cli.prompt_registry.rollback(agent_name, to_version).await?;
            println!("rolled back {agent_name} to {}", version.version);
        }
        other => {
            eprintln!("unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}
