//! A/B test runner: drives the full pipeline over a held-out query set
//! for a baseline and each candidate variant, scores every run with the
//! critic, and ranks variants by performance delta against the baseline.
//!
//! Grounded on `optimizer/runner.py`'s `TestRunner`. The original never
//! actually wires the variant's prompt into the agent under test — it
//! runs the same live pipeline for baseline and every variant and
//! compares noise against noise. Here every agent's LLM call is routed
//! through `PipelineDeps::resolve_instruction`, so a variant run scopes
//! its candidate prompt via `PipelineDeps::with_prompt_override` for the
//! duration of that one test suite and nothing else observes it.

use crate::config::TestQueriesConfig;
use crate::critic::CriticEvaluator;
use crate::pipeline::{run_pipeline, PipelineDeps};
use crate::providers::ResolvedProvider;
use crate::types::{PerQueryResult, PromptVariant, QueryContext, TestQuery, TestResult};
use std::collections::HashMap;
use std::sync::Arc;

pub struct TestRunner {
    evaluator: Arc<CriticEvaluator>,
}

impl TestRunner {
    pub fn new(evaluator: Arc<CriticEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn load_test_queries(config: &TestQueriesConfig, agent_name: &str) -> Vec<TestQuery> {
        config
            .get(agent_name)
            .map(|specs| {
                specs
                    .iter()
                    .map(|spec| TestQuery {
                        query: spec.query.clone(),
                        expected_intent: spec.expected_intent.clone(),
                        expected_entities: spec.expected_entities.clone(),
                        expected_template: spec.expected_template.clone(),
                        expected_retrieval: spec.expected_retrieval.clone(),
                        min_confidence: spec.min_confidence,
                        min_sources: spec.min_sources,
                        min_results: spec.min_results,
                        no_error: spec.no_error,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run the baseline, then every variant, over `test_queries`, ranked
    /// best-performance-delta first. Each variant's run scopes its
    /// candidate prompt onto `deps` for that run only, via
    /// `PipelineDeps::with_prompt_override`; the baseline run and every
    /// other variant's run are unaffected.
    pub async fn run_tests(
        &self,
        variants: &[PromptVariant],
        test_queries: &[TestQuery],
        deps: &PipelineDeps,
        provider: Option<&ResolvedProvider>,
    ) -> Vec<TestResult> {
        let (baseline_scores, _) = self.run_test_suite(test_queries, deps, provider).await;

        let mut results = Vec::new();
        for variant in variants {
            let scoped_deps = deps.with_prompt_override(&variant.agent_name, &variant.prompt_content);
            let (scores, per_query) = self.run_test_suite(test_queries, &scoped_deps, provider).await;
            let performance_delta = calculate_delta(&baseline_scores, &scores);
            let (passed_count, failed_count) = count_pass_fail(&per_query);

            results.push(TestResult {
                variant: variant.clone(),
                scores,
                baseline_scores: baseline_scores.clone(),
                per_query_scores: per_query,
                performance_delta,
                test_queries_count: test_queries.len(),
                passed_count,
                failed_count,
                created_at: chrono::Utc::now(),
            });
        }

        results.sort_by(|a, b| {
            b.performance_delta
                .partial_cmp(&a.performance_delta)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }

    /// Run every test query through the pipeline, evaluate each stage via
    /// the critic, and average each stage's composite score across
    /// queries alongside per-query diagnostics.
    async fn run_test_suite(
        &self,
        test_queries: &[TestQuery],
        deps: &PipelineDeps,
        provider: Option<&ResolvedProvider>,
    ) -> (HashMap<String, f64>, Vec<PerQueryResult>) {
        let mut score_totals: HashMap<String, (f64, usize)> = HashMap::new();
        let mut per_query = Vec::new();

        for tq in test_queries {
            let ctx = run_pipeline(&tq.query, deps).await;
            let evaluations = self.evaluator.evaluate_pipeline(&ctx, None, provider).await;

            let mut per_query_scores = HashMap::new();
            for eval in &evaluations {
                let entry = score_totals.entry(eval.agent_name.clone()).or_insert((0.0, 0));
                entry.0 += eval.composite_score;
                entry.1 += 1;
                per_query_scores.insert(eval.agent_name.clone(), eval.composite_score);
            }

            let composite_score = if per_query_scores.is_empty() {
                0.0
            } else {
                per_query_scores.values().sum::<f64>() / per_query_scores.len() as f64
            };

            per_query.push(PerQueryResult {
                query: tq.query.clone(),
                scores: per_query_scores,
                composite_score,
                assertions_passed: check_assertions(tq, &ctx),
                intent: ctx.intent().map(|i| i.to_string()),
                entities: ctx.entities().to_vec(),
                confidence: ctx.confidence(),
                error: ctx.error().map(|s| s.to_string()),
            });
        }

        let averages = score_totals
            .into_iter()
            .map(|(agent, (sum, count))| (agent, if count == 0 { 0.0 } else { sum / count as f64 }))
            .collect();
        (averages, per_query)
    }

    /// Run a single query end to end and report full diagnostic detail,
    /// independent of any variant comparison.
    pub async fn run_single_test(
        &self,
        test_query: &TestQuery,
        deps: &PipelineDeps,
        provider: Option<&ResolvedProvider>,
    ) -> PerQueryResult {
        let ctx = run_pipeline(&test_query.query, deps).await;
        let evaluations = self.evaluator.evaluate_pipeline(&ctx, None, provider).await;

        let scores: HashMap<String, f64> = evaluations
            .iter()
            .map(|e| (e.agent_name.clone(), e.composite_score))
            .collect();
        let composite_score = if scores.is_empty() {
            0.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };

        PerQueryResult {
            query: test_query.query.clone(),
            scores,
            composite_score,
            assertions_passed: check_assertions(test_query, &ctx),
            intent: ctx.intent().map(|i| i.to_string()),
            entities: ctx.entities().to_vec(),
            confidence: ctx.confidence(),
            error: ctx.error().map(|s| s.to_string()),
        }
    }
}

/// All declared assertions on `tq` must hold against the completed run.
fn check_assertions(tq: &TestQuery, ctx: &QueryContext) -> bool {
    if let Some(expected_intent) = &tq.expected_intent {
        if ctx.intent().map(|i| i.to_string()).as_deref() != Some(expected_intent.as_str()) {
            return false;
        }
    }
    if !tq.expected_entities.is_empty() {
        let entities = ctx.entities();
        if !tq.expected_entities.iter().all(|e| entities.contains(e)) {
            return false;
        }
    }
    if let Some(confidence) = ctx.confidence() {
        if confidence < tq.min_confidence {
            return false;
        }
    } else if tq.min_confidence > 0.0 {
        return false;
    }
    if ctx.sources().len() < tq.min_sources {
        return false;
    }
    if ctx.graph_results().len() + ctx.vector_results().len() < tq.min_results {
        return false;
    }
    if tq.no_error && ctx.error().is_some() {
        return false;
    }
    true
}

/// Average, across criteria present in both maps, of `variant - baseline`.
fn calculate_delta(baseline: &HashMap<String, f64>, variant: &HashMap<String, f64>) -> f64 {
    let deltas: Vec<f64> = baseline
        .iter()
        .filter_map(|(k, base_score)| variant.get(k).map(|v| v - base_score))
        .collect();
    if deltas.is_empty() {
        0.0
    } else {
        deltas.iter().sum::<f64>() / deltas.len() as f64
    }
}

fn count_pass_fail(per_query: &[PerQueryResult]) -> (usize, usize) {
    let passed = per_query.iter().filter(|r| r.assertions_passed).count();
    (passed, per_query.len() - passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(min_confidence: f64) -> TestQuery {
        TestQuery {
            query: "what is ReAct?".to_string(),
            expected_intent: Some("lookup".to_string()),
            expected_entities: vec!["m:react".to_string()],
            expected_template: None,
            expected_retrieval: None,
            min_confidence,
            min_sources: 1,
            min_results: 1,
            no_error: true,
        }
    }

    #[test]
    fn calculate_delta_averages_overlapping_criteria() {
        let baseline = HashMap::from([("a".to_string(), 0.5), ("b".to_string(), 0.4)]);
        let variant = HashMap::from([("a".to_string(), 0.7), ("b".to_string(), 0.4)]);
        assert!((calculate_delta(&baseline, &variant) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn calculate_delta_zero_with_no_overlap() {
        let baseline = HashMap::from([("a".to_string(), 0.5)]);
        let variant = HashMap::from([("b".to_string(), 0.9)]);
        assert_eq!(calculate_delta(&baseline, &variant), 0.0);
    }

    #[test]
    fn check_assertions_fails_on_low_confidence() {
        use crate::types::{Intent, StageOutcome};
        let mut ctx = QueryContext::new("what is ReAct?");
        ctx.push(StageOutcome::IntentClassified {
            intent: Intent::Lookup,
            entities: vec!["m:react".to_string()],
        });
        ctx.push(StageOutcome::Synthesized {
            answer: "...".to_string(),
            sources: vec![],
            confidence: 0.2,
        });
        assert!(!check_assertions(&query(0.5), &ctx));
    }

    #[test]
    fn count_pass_fail_splits_correctly() {
        let results = vec![
            PerQueryResult {
                query: "q1".to_string(),
                scores: HashMap::new(),
                composite_score: 0.8,
                assertions_passed: true,
                intent: None,
                entities: vec![],
                confidence: None,
                error: None,
            },
            PerQueryResult {
                query: "q2".to_string(),
                scores: HashMap::new(),
                composite_score: 0.2,
                assertions_passed: false,
                intent: None,
                entities: vec![],
                confidence: None,
                error: None,
            },
        ];
        assert_eq!(count_pass_fail(&results), (1, 1));
    }
}
