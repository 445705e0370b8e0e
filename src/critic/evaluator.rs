//! CriticEvaluator: scores an agent's output against its configured
//! criteria, with sampling, LLM-backed feedback generation for
//! low-scoring responses, and a `QueryContext`-driven pipeline-wide
//! evaluation sweep.
//!
//! Grounded on `evaluator.py`'s `CriticEvaluator`.

use crate::config::{CriterionSpec, EvaluationCriteriaConfig};
use crate::critic::scorer::{calculate_composite_score, score_criterion, EvalContext};
use crate::providers::ResolvedProvider;
use crate::types::{EvaluationCriterion, EvaluationRecord, QueryContext};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

const MAX_RESPONSE_LENGTH: usize = 1000;

pub struct CriticEvaluator {
    criteria_config: EvaluationCriteriaConfig,
    eval_counter: AtomicUsize,
}

fn criterion_from_spec(spec: &CriterionSpec) -> EvaluationCriterion {
    EvaluationCriterion {
        id: spec.id.clone(),
        name: spec.name.clone(),
        principle_id: spec.principle_id.clone(),
        agent_target: spec.agent_target.clone(),
        description: spec.description.clone(),
        weight: spec.weight,
        scoring_rubric: spec.scoring_rubric.clone(),
        is_active: spec.is_active,
    }
}

impl CriticEvaluator {
    pub fn new(criteria_config: EvaluationCriteriaConfig) -> Self {
        Self {
            criteria_config,
            eval_counter: AtomicUsize::new(0),
        }
    }

    fn criteria_for_agent(&self, agent_name: &str) -> Vec<EvaluationCriterion> {
        self.criteria_config
            .criteria
            .get(agent_name)
            .map(|specs| {
                specs
                    .iter()
                    .filter(|s| s.is_active)
                    .map(criterion_from_spec)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Score `response` against every active criterion for `agent_name`.
    /// Returns `None` when sampling excludes this call or no criteria are
    /// registered for the agent — both non-errors.
    pub async fn evaluate(
        &self,
        agent_name: &str,
        query: &str,
        response: &str,
        context: &EvalContext,
        conversation_id: Option<&str>,
        provider: Option<&ResolvedProvider>,
    ) -> Option<EvaluationRecord> {
        let settings = &self.criteria_config.settings;
        if settings.evaluation_sample_rate < 1.0
            && rand::thread_rng().gen::<f64>() > settings.evaluation_sample_rate
        {
            return None;
        }

        let criteria = self.criteria_for_agent(agent_name);
        if criteria.is_empty() {
            info!(agent = agent_name, "no evaluation criteria registered, skipping");
            return None;
        }

        let mut scores = HashMap::new();
        for criterion in &criteria {
            let score = score_criterion(criterion, query, response, context, provider).await;
            scores.insert(criterion.id.clone(), score);
        }

        let composite_score = calculate_composite_score(&scores, &criteria);

        let feedback = if settings.feedback_enabled && composite_score < settings.min_composite_score {
            Some(self.generate_feedback(&criteria, &scores, query, response, provider).await)
        } else {
            None
        };

        let count = self.eval_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let now = chrono::Utc::now();
        let id = format!("eval:{}-{count:04}", now.format("%Y%m%d"));

        let truncated_response: String = if response.len() > MAX_RESPONSE_LENGTH {
            let mut s: String = response.chars().take(MAX_RESPONSE_LENGTH).collect();
            s.push_str("...");
            s
        } else {
            response.to_string()
        };

        Some(EvaluationRecord {
            id,
            agent_name: agent_name.to_string(),
            query: query.to_string(),
            response: truncated_response,
            scores,
            composite_score,
            feedback,
            conversation_id: conversation_id.map(|s| s.to_string()),
            created_at: now,
        })
    }

    /// Evaluate every evaluable stage of a completed pipeline run:
    /// synthesizer, intent classifier, search planner, graph retriever.
    pub async fn evaluate_pipeline(
        &self,
        ctx: &QueryContext,
        conversation_id: Option<&str>,
        provider: Option<&ResolvedProvider>,
    ) -> Vec<EvaluationRecord> {
        let mut evaluations = Vec::new();
        let query = ctx.query.as_str();
        let intent = ctx.intent();
        let entities = ctx.entities().to_vec();
        let strategy = ctx.strategy().cloned();
        let kg_result_count = ctx.graph_results().len();
        let vector_result_count = ctx.vector_results().len();

        if let Some(answer) = ctx.answer() {
            let context = EvalContext {
                kg_result_count,
                vector_result_count,
                source_count: ctx.sources().len(),
                entities: entities.clone(),
                intent: intent.map(|i| i.to_string()),
                search_strategy: strategy.clone(),
                error: ctx.error().map(|s| s.to_string()),
            };
            if let Some(eval) = self
                .evaluate("synthesizer", query, answer, &context, conversation_id, provider)
                .await
            {
                evaluations.push(eval);
            }
        }

        if let Some(intent) = intent {
            let response = format!("Intent: {intent}, Entities: {entities:?}");
            let context = EvalContext {
                entities: entities.clone(),
                intent: Some(intent.to_string()),
                ..Default::default()
            };
            if let Some(eval) = self
                .evaluate("intent_classifier", query, &response, &context, conversation_id, provider)
                .await
            {
                evaluations.push(eval);
            }
        }

        if let Some(strategy) = &strategy {
            let response = serde_json::to_string(strategy).unwrap_or_default();
            let context = EvalContext {
                entities: entities.clone(),
                intent: intent.map(|i| i.to_string()),
                search_strategy: Some(strategy.clone()),
                ..Default::default()
            };
            if let Some(eval) = self
                .evaluate("search_planner", query, &response, &context, conversation_id, provider)
                .await
            {
                evaluations.push(eval);
            }
        }

        let cypher_executed = ctx.cypher_executed().len();
        let error = ctx.error().map(|s| s.to_string());
        let mut retriever_response = format!("Results: {kg_result_count}, Queries: {cypher_executed}");
        if let Some(error) = &error {
            retriever_response.push_str(&format!(", Error: {error}"));
        }
        let context = EvalContext {
            kg_result_count,
            search_strategy: strategy.clone(),
            error: error.clone(),
            ..Default::default()
        };
        if let Some(eval) = self
            .evaluate("graph_retriever", query, &retriever_response, &context, conversation_id, provider)
            .await
        {
            evaluations.push(eval);
        }

        evaluations
    }

    async fn generate_feedback(
        &self,
        criteria: &[EvaluationCriterion],
        scores: &HashMap<String, f64>,
        query: &str,
        response: &str,
        provider: Option<&ResolvedProvider>,
    ) -> String {
        let Some(resolved) = provider else {
            return Self::heuristic_feedback(criteria, scores);
        };

        let mut low_scores: Vec<(&EvaluationCriterion, f64)> = criteria
            .iter()
            .map(|c| (c, *scores.get(&c.id).unwrap_or(&0.0)))
            .filter(|(_, score)| *score < 0.6)
            .collect();
        if low_scores.is_empty() {
            return String::new();
        }
        low_scores.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let criteria_summary: String = low_scores
            .iter()
            .take(3)
            .map(|(c, score)| format!("- {}: {:.2} ({})", c.name, score, c.description))
            .collect::<Vec<_>>()
            .join("\n");

        let truncated: String = response.chars().take(500).collect();
        let prompt = format!(
            "Based on the evaluation scores below, provide brief improvement suggestions.\n\n\
             Query: {query}\nResponse: {truncated}\n\nLow-scoring criteria:\n{criteria_summary}\n\n\
             Provide 2-3 specific, actionable suggestions to improve the response.\n\
             Keep it concise (under 100 words)."
        );

        match resolved.provider.generate(&prompt, 150).await {
            Ok(feedback) => feedback.trim().to_string(),
            Err(_) => Self::heuristic_feedback(criteria, scores),
        }
    }

    fn heuristic_feedback(criteria: &[EvaluationCriterion], scores: &HashMap<String, f64>) -> String {
        let low: Vec<&str> = criteria
            .iter()
            .filter(|c| *scores.get(&c.id).unwrap_or(&0.0) < 0.6)
            .map(|c| c.name.as_str())
            .take(3)
            .collect();
        if low.is_empty() {
            String::new()
        } else {
            format!("Consider improving: {}", low.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvalSettings;

    fn config_with_one_criterion() -> EvaluationCriteriaConfig {
        let spec = CriterionSpec {
            id: "ec:answer-relevance".to_string(),
            name: "Answer Relevance".to_string(),
            principle_id: "p:1".to_string(),
            agent_target: "synthesizer".to_string(),
            description: "Is the answer relevant?".to_string(),
            weight: 1.0,
            scoring_rubric: "rubric".to_string(),
            is_active: true,
        };
        let mut criteria = HashMap::new();
        criteria.insert("synthesizer".to_string(), vec![spec]);
        EvaluationCriteriaConfig {
            criteria,
            settings: EvalSettings {
                min_composite_score: 0.6,
                evaluation_sample_rate: 1.0,
                max_response_length: 1000,
                feedback_enabled: true,
            },
        }
    }

    #[tokio::test]
    async fn evaluate_returns_none_for_unregistered_agent() {
        let evaluator = CriticEvaluator::new(config_with_one_criterion());
        let result = evaluator
            .evaluate("unknown_agent", "q", "a long enough response here", &EvalContext::default(), None, None)
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn evaluate_scores_registered_agent_and_flags_low_scores() {
        let evaluator = CriticEvaluator::new(config_with_one_criterion());
        let result = evaluator
            .evaluate("synthesizer", "q", "no", &EvalContext::default(), None, None)
            .await
            .unwrap();
        assert!(result.scores.contains_key("ec:answer-relevance"));
        assert!(result.composite_score < 0.6);
        assert!(result.feedback.is_some());
    }
}
