//! Per-criterion scoring: an LLM-prompted judge with a heuristic
//! fallback table keyed by criterion id, plus the weighted composite.
//!
//! Grounded on `scorer.py`'s `score_criterion`/`_heuristic_score`/
//! `calculate_composite_score`.

use crate::providers::ResolvedProvider;
use crate::types::{EvaluationCriterion, SearchStrategy};
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// The subset of pipeline state a criterion may need to score against,
/// mirroring the original's loosely-typed `context` dict.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub kg_result_count: usize,
    pub vector_result_count: usize,
    pub source_count: usize,
    pub entities: Vec<String>,
    pub intent: Option<String>,
    pub search_strategy: Option<SearchStrategy>,
    pub error: Option<String>,
}

const MAX_SCORING_RESPONSE_CHARS: usize = 1000;

pub async fn score_criterion(
    criterion: &EvaluationCriterion,
    query: &str,
    response: &str,
    context: &EvalContext,
    provider: Option<&ResolvedProvider>,
) -> f64 {
    let Some(resolved) = provider else {
        return heuristic_score(criterion, response, context);
    };

    let prompt = build_scoring_prompt(criterion, query, response, context);
    match resolved.provider.generate(&prompt, 50).await {
        Ok(result) => parse_score(&result),
        Err(e) => {
            warn!(criterion = %criterion.id, error = %e, "LLM scoring failed, falling back to heuristic");
            heuristic_score(criterion, response, context)
        }
    }
}

fn build_scoring_prompt(
    criterion: &EvaluationCriterion,
    query: &str,
    response: &str,
    context: &EvalContext,
) -> String {
    let truncated: String = response.chars().take(MAX_SCORING_RESPONSE_CHARS).collect();
    format!(
        "You are evaluating an AI assistant's response quality.\n\n\
         Criterion: {}\nDescription: {}\n\nScoring Rubric:\n{}\n\n\
         User Query: {query}\n\nAssistant Response: {truncated}\n\n\
         Context:\n- KG results retrieved: {}\n- Vector results retrieved: {}\n- Sources cited: {}\n\n\
         Based on the rubric above, assign a score from 0.0 to 1.0.\n\
         Output ONLY the numeric score (e.g., \"0.8\"). No explanation needed.\n\nScore:",
        criterion.name,
        criterion.description,
        criterion.scoring_rubric,
        context.kg_result_count,
        context.vector_result_count,
        context.source_count,
    )
}

fn parse_score(result: &str) -> f64 {
    let re = Regex::new(r"(\d+\.?\d*)").unwrap();
    let Some(captures) = re.captures(result.trim()) else {
        return 0.5;
    };
    let Ok(mut score) = captures[1].parse::<f64>() else {
        return 0.5;
    };
    if score > 1.0 {
        score /= 100.0;
    }
    score.clamp(0.0, 1.0)
}

fn heuristic_score(criterion: &EvaluationCriterion, response: &str, context: &EvalContext) -> f64 {
    match criterion.id.as_str() {
        "ec:answer-relevance" => {
            if response.len() < 20 {
                0.2
            } else {
                0.7
            }
        }
        "ec:source-citation" => match context.source_count {
            0 => 0.3,
            1 => 0.6,
            _ => 0.9,
        },
        "ec:factual-accuracy" => {
            if context.kg_result_count > 0 {
                0.7
            } else {
                0.5
            }
        }
        "ec:reasoning-steps" => {
            const KEYWORDS: [&str; 3] = ["because", "therefore", "since"];
            let lower = response.to_lowercase();
            if KEYWORDS.iter().any(|k| lower.contains(k)) {
                0.7
            } else {
                0.4
            }
        }
        "ec:completeness" => {
            if context.kg_result_count > 0 && response.len() > 200 {
                0.7
            } else {
                0.5
            }
        }
        "ec:conciseness" => {
            if response.len() > 2000 {
                0.4
            } else if response.len() > 1000 {
                0.6
            } else {
                0.8
            }
        }
        "ec:safety" => 1.0,
        "ec:intent-accuracy" => 0.7,
        "ec:entity-extraction" => {
            if !context.entities.is_empty() {
                0.8
            } else {
                0.4
            }
        }
        "ec:scope-detection" => {
            if context.intent.as_deref() == Some("out_of_scope") {
                0.9
            } else {
                0.7
            }
        }
        "ec:template-selection" => {
            if context
                .search_strategy
                .as_ref()
                .is_some_and(|s| s.cypher_template.is_some())
            {
                0.8
            } else {
                0.4
            }
        }
        "ec:retrieval-mode" => {
            if context
                .search_strategy
                .as_ref()
                .is_some_and(|s| s.retrieval_type.is_some())
            {
                0.7
            } else {
                0.5
            }
        }
        "ec:parameter-binding" => {
            if context
                .search_strategy
                .as_ref()
                .is_some_and(|s| !s.parameters.is_empty())
            {
                0.8
            } else {
                0.5
            }
        }
        "ec:query-execution" => {
            if context.error.is_some() {
                0.0
            } else if context.kg_result_count > 0 {
                1.0
            } else {
                0.5
            }
        }
        "ec:result-relevance" => {
            if context.kg_result_count > 0 {
                0.7
            } else {
                0.3
            }
        }
        _ => 0.5,
    }
}

/// Weighted average of `scores` against `criteria`'s declared weights.
/// Criteria with no corresponding score are excluded from both sums.
pub fn calculate_composite_score(scores: &HashMap<String, f64>, criteria: &[EvaluationCriterion]) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for criterion in criteria {
        if let Some(score) = scores.get(&criterion.id) {
            weighted_sum += score * criterion.weight;
            total_weight += criterion.weight;
        }
    }
    if total_weight == 0.0 {
        0.0
    } else {
        weighted_sum / total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(id: &str, weight: f64) -> EvaluationCriterion {
        EvaluationCriterion {
            id: id.to_string(),
            name: id.to_string(),
            principle_id: "p:1".to_string(),
            agent_target: "synthesizer".to_string(),
            description: "test".to_string(),
            weight,
            scoring_rubric: "rubric".to_string(),
            is_active: true,
        }
    }

    #[test]
    fn parse_score_normalizes_percentage_scale() {
        assert_eq!(parse_score("85"), 0.85);
        assert_eq!(parse_score("0.8"), 0.8);
    }

    #[test]
    fn parse_score_defaults_when_unparseable() {
        assert_eq!(parse_score("no number here"), 0.5);
    }

    #[test]
    fn composite_score_weights_contributions() {
        let criteria = vec![criterion("a", 2.0), criterion("b", 1.0)];
        let mut scores = HashMap::new();
        scores.insert("a".to_string(), 1.0);
        scores.insert("b".to_string(), 0.0);
        assert!((calculate_composite_score(&scores, &criteria) - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn composite_score_is_zero_with_no_overlap() {
        let criteria = vec![criterion("a", 1.0)];
        let scores = HashMap::new();
        assert_eq!(calculate_composite_score(&scores, &criteria), 0.0);
    }

    #[test]
    fn heuristic_short_response_scores_low_on_relevance() {
        let c = criterion("ec:answer-relevance", 1.0);
        assert_eq!(heuristic_score(&c, "short", &EvalContext::default()), 0.2);
    }
}
