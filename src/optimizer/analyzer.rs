//! Failure pattern mining: groups low-scoring `Evaluation` records by
//! `{agent}:{criterion}`, and for any group with enough samples, asks an
//! LLM (or a keyword heuristic) to classify the pattern and hypothesize
//! root causes.
//!
//! Grounded on `optimizer/analyzer.py`'s `FailureAnalyzer`.

use crate::error::{EngineError, EngineResult};
use crate::graph::GraphClient;
use crate::providers::ResolvedProvider;
use crate::types::{FailurePattern, PatternStatus, PropertyValue, SerializedRecord, SerializedValue};
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

const DEFAULT_THRESHOLD: f64 = 0.6;
const DEFAULT_MIN_SAMPLES: usize = 5;
const MAX_LOW_SCORE_EVALUATIONS: i64 = 100;

struct FailureSample {
    query: String,
    response: String,
    score: f64,
}

pub struct FailureAnalyzer {
    graph: GraphClient,
    threshold: f64,
    min_samples: usize,
}

fn prop_str(properties: &HashMap<String, PropertyValue>, key: &str) -> String {
    match properties.get(key) {
        Some(PropertyValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

fn node_properties(record: &SerializedRecord, column: &str) -> Option<&HashMap<String, PropertyValue>> {
    match record.get(column) {
        Some(SerializedValue::Node { properties, .. }) => Some(properties),
        _ => None,
    }
}

impl FailureAnalyzer {
    pub fn new(graph: GraphClient) -> Self {
        Self {
            graph,
            threshold: DEFAULT_THRESHOLD,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    pub fn with_thresholds(mut self, threshold: f64, min_samples: usize) -> Self {
        self.threshold = threshold;
        self.min_samples = min_samples;
        self
    }

    /// Mine failure patterns across every evaluated agent, or just
    /// `agent_name` when given. Returns one `FailurePattern` per
    /// `{agent}:{criterion}` group meeting `min_samples`.
    pub async fn analyze(
        &self,
        agent_name: Option<&str>,
        provider: Option<&ResolvedProvider>,
    ) -> EngineResult<Vec<FailurePattern>> {
        let groups = self.group_low_scores(agent_name).await?;

        let mut patterns = Vec::new();
        for (key, samples) in groups {
            if samples.len() < self.min_samples {
                continue;
            }
            let Some((agent, criterion_id)) = key.split_once(':').map(|(a, c)| (a.to_string(), c.to_string()))
            else {
                continue;
            };
            let pattern = self.create_pattern(agent, criterion_id, samples, provider).await;
            self.save_pattern(&pattern).await?;
            patterns.push(pattern);
        }
        Ok(patterns)
    }

    async fn group_low_scores(&self, agent_name: Option<&str>) -> EngineResult<HashMap<String, Vec<FailureSample>>> {
        let (cypher, mut params): (&str, HashMap<String, PropertyValue>) = if agent_name.is_some() {
            (
                "MATCH (e:Evaluation) WHERE e.composite_score < $threshold AND e.agent_name = $agent_name \
                 RETURN e ORDER BY e.created_at DESC LIMIT $limit",
                HashMap::new(),
            )
        } else {
            (
                "MATCH (e:Evaluation) WHERE e.composite_score < $threshold \
                 RETURN e ORDER BY e.created_at DESC LIMIT $limit",
                HashMap::new(),
            )
        };
        params.insert("threshold".to_string(), PropertyValue::Float(self.threshold));
        params.insert("limit".to_string(), PropertyValue::Int(MAX_LOW_SCORE_EVALUATIONS));
        if let Some(agent) = agent_name {
            params.insert("agent_name".to_string(), PropertyValue::Str(agent.to_string()));
        }

        let records = self.graph.execute_template(cypher, &params).await?;

        let mut groups: HashMap<String, Vec<FailureSample>> = HashMap::new();
        for record in &records {
            let Some(properties) = node_properties(record, "e") else {
                continue;
            };
            let agent = prop_str(properties, "agent_name");
            let query = prop_str(properties, "query");
            let response = prop_str(properties, "response");
            let scores_json = prop_str(properties, "scores_json");
            let Ok(scores) = serde_json::from_str::<HashMap<String, f64>>(&scores_json) else {
                continue;
            };
            for (criterion_id, score) in scores {
                if score >= self.threshold {
                    continue;
                }
                let key = format!("{agent}:{criterion_id}");
                groups.entry(key).or_default().push(FailureSample {
                    query: query.clone(),
                    response: response.clone(),
                    score,
                });
            }
        }
        Ok(groups)
    }

    async fn create_pattern(
        &self,
        agent_name: String,
        criterion_id: String,
        samples: Vec<FailureSample>,
        provider: Option<&ResolvedProvider>,
    ) -> FailurePattern {
        let frequency = samples.len();
        let avg_score = samples.iter().map(|s| s.score).sum::<f64>() / frequency as f64;
        let pattern_type = infer_pattern_type(&criterion_id);

        let sample_queries: Vec<String> = samples.iter().take(3).map(|s| s.query.clone()).collect();
        let sample_responses: Vec<String> = samples
            .iter()
            .take(3)
            .map(|s| s.response.chars().take(300).collect())
            .collect();

        let hypotheses = self
            .generate_hypotheses(&agent_name, &criterion_id, &sample_queries, &sample_responses, provider)
            .await;

        let now = chrono::Utc::now();
        let criterion_suffix = criterion_id.strip_prefix("ec:").unwrap_or(&criterion_id);

        FailurePattern {
            id: format!("fp:{agent_name}:{criterion_suffix}:{}", now.format("%Y-%m")),
            agent_name,
            criterion_id: criterion_id.clone(),
            pattern_type,
            description: format!(
                "{frequency} responses scored below {:.2} on {criterion_id} (avg {avg_score:.2})",
                self.threshold
            ),
            frequency,
            avg_score,
            sample_queries,
            sample_responses,
            root_cause_hypotheses: hypotheses,
            suggested_fixes: Vec::new(),
            status: PatternStatus::Detected,
            created_at: now,
            resolved_at: None,
        }
    }

    async fn generate_hypotheses(
        &self,
        agent_name: &str,
        criterion_id: &str,
        sample_queries: &[String],
        sample_responses: &[String],
        provider: Option<&ResolvedProvider>,
    ) -> Vec<String> {
        let Some(resolved) = provider else {
            return fallback_hypotheses(criterion_id);
        };

        let examples: String = sample_queries
            .iter()
            .zip(sample_responses.iter())
            .map(|(q, r)| format!("- Query: {q}\n  Response: {r}"))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "The \"{agent_name}\" agent is consistently scoring poorly on the \"{criterion_id}\" \
             evaluation criterion. Here are example failures:\n\n{examples}\n\n\
             List 2-3 likely root-cause hypotheses for this failure pattern as a JSON array of strings. \
             Output ONLY the JSON array, e.g. [\"hypothesis one\", \"hypothesis two\"]."
        );

        match resolved.provider.generate(&prompt, 200).await {
            Ok(text) => parse_hypotheses(&text).unwrap_or_else(|| fallback_hypotheses(criterion_id)),
            Err(e) => {
                warn!(criterion = criterion_id, error = %e, "hypothesis generation failed, using fallback");
                fallback_hypotheses(criterion_id)
            }
        }
    }

    async fn save_pattern(&self, pattern: &FailurePattern) -> EngineResult<()> {
        const CYPHER: &str = "MERGE (fp:FailurePattern {id: $id}) SET \
             fp.agent_name = $agent_name, fp.criterion_id = $criterion_id, \
             fp.pattern_type = $pattern_type, fp.description = $description, \
             fp.frequency = $frequency, fp.avg_score = $avg_score, \
             fp.sample_queries = $sample_queries, fp.sample_responses = $sample_responses, \
             fp.root_cause_hypotheses = $root_cause_hypotheses, fp.status = $status, \
             fp.created_at = $created_at \
             RETURN fp";
        let mut params = HashMap::new();
        params.insert("id".to_string(), PropertyValue::Str(pattern.id.clone()));
        params.insert(
            "agent_name".to_string(),
            PropertyValue::Str(pattern.agent_name.clone()),
        );
        params.insert(
            "criterion_id".to_string(),
            PropertyValue::Str(pattern.criterion_id.clone()),
        );
        params.insert(
            "pattern_type".to_string(),
            PropertyValue::Str(pattern.pattern_type.clone()),
        );
        params.insert(
            "description".to_string(),
            PropertyValue::Str(pattern.description.clone()),
        );
        params.insert("frequency".to_string(), PropertyValue::Int(pattern.frequency as i64));
        params.insert("avg_score".to_string(), PropertyValue::Float(pattern.avg_score));
        params.insert(
            "sample_queries".to_string(),
            PropertyValue::Str(serde_json::to_string(&pattern.sample_queries).unwrap_or_default()),
        );
        params.insert(
            "sample_responses".to_string(),
            PropertyValue::Str(serde_json::to_string(&pattern.sample_responses).unwrap_or_default()),
        );
        params.insert(
            "root_cause_hypotheses".to_string(),
            PropertyValue::Str(serde_json::to_string(&pattern.root_cause_hypotheses).unwrap_or_default()),
        );
        params.insert(
            "status".to_string(),
            PropertyValue::Str(pattern.status.as_str().to_string()),
        );
        params.insert(
            "created_at".to_string(),
            PropertyValue::Str(pattern.created_at.to_rfc3339()),
        );
        self.graph.execute_template(CYPHER, &params).await?;
        Ok(())
    }

    pub async fn get_patterns(
        &self,
        status: Option<PatternStatus>,
        agent_name: Option<&str>,
    ) -> EngineResult<Vec<FailurePattern>> {
        let cypher = "MATCH (fp:FailurePattern) \
             WHERE ($status IS NULL OR fp.status = $status) \
             AND ($agent_name IS NULL OR fp.agent_name = $agent_name) \
             RETURN fp ORDER BY fp.created_at DESC";
        let mut params = HashMap::new();
        params.insert(
            "status".to_string(),
            match status {
                Some(s) => PropertyValue::Str(s.as_str().to_string()),
                None => PropertyValue::Null,
            },
        );
        params.insert(
            "agent_name".to_string(),
            match agent_name {
                Some(a) => PropertyValue::Str(a.to_string()),
                None => PropertyValue::Null,
            },
        );
        let records = self.graph.execute_template(cypher, &params).await?;
        Ok(records
            .iter()
            .filter_map(|r| record_to_failure_pattern(r, "fp"))
            .collect())
    }

    pub async fn update_pattern_status(&self, pattern_id: &str, status: PatternStatus) -> EngineResult<()> {
        let cypher = if status == PatternStatus::Resolved {
            "MATCH (fp:FailurePattern {id: $id}) SET fp.status = $status, fp.resolved_at = $now RETURN fp"
        } else {
            "MATCH (fp:FailurePattern {id: $id}) SET fp.status = $status RETURN fp"
        };
        let mut params = HashMap::new();
        params.insert("id".to_string(), PropertyValue::Str(pattern_id.to_string()));
        params.insert(
            "status".to_string(),
            PropertyValue::Str(status.as_str().to_string()),
        );
        if status == PatternStatus::Resolved {
            params.insert(
                "now".to_string(),
                PropertyValue::Str(chrono::Utc::now().to_rfc3339()),
            );
        }
        let records = self.graph.execute_template(cypher, &params).await?;
        if records.is_empty() {
            return Err(EngineError::RegistryInvariant(format!(
                "failure pattern {pattern_id} not found"
            )));
        }
        Ok(())
    }
}

fn record_to_failure_pattern(record: &SerializedRecord, column: &str) -> Option<FailurePattern> {
    let properties = node_properties(record, column)?;
    let sample_queries: Vec<String> =
        serde_json::from_str(&prop_str(properties, "sample_queries")).unwrap_or_default();
    let sample_responses: Vec<String> =
        serde_json::from_str(&prop_str(properties, "sample_responses")).unwrap_or_default();
    let root_cause_hypotheses: Vec<String> =
        serde_json::from_str(&prop_str(properties, "root_cause_hypotheses")).unwrap_or_default();
    let created_at = match properties.get("created_at") {
        Some(PropertyValue::Str(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now),
        _ => chrono::Utc::now(),
    };
    let resolved_at = match properties.get("resolved_at") {
        Some(PropertyValue::Str(s)) => {
            chrono::DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&chrono::Utc))
        }
        _ => None,
    };
    let avg_score = match properties.get("avg_score") {
        Some(PropertyValue::Float(f)) => *f,
        Some(PropertyValue::Int(i)) => *i as f64,
        _ => 0.0,
    };
    let frequency = match properties.get("frequency") {
        Some(PropertyValue::Int(i)) => *i as usize,
        _ => 0,
    };

    Some(FailurePattern {
        id: prop_str(properties, "id"),
        agent_name: prop_str(properties, "agent_name"),
        criterion_id: prop_str(properties, "criterion_id"),
        pattern_type: prop_str(properties, "pattern_type"),
        description: prop_str(properties, "description"),
        frequency,
        avg_score,
        sample_queries,
        sample_responses,
        root_cause_hypotheses,
        suggested_fixes: Vec::new(),
        status: PatternStatus::parse(&prop_str(properties, "status")).unwrap_or(PatternStatus::Detected),
        created_at,
        resolved_at,
    })
}

/// Keyword classification of which subsystem a failing criterion points
/// at, mirroring `analyzer.py`'s `_infer_pattern_type`.
fn infer_pattern_type(criterion_id: &str) -> String {
    let lower = criterion_id.to_lowercase();
    const OUTPUT_QUALITY: [&str; 4] = ["source", "citation", "grounding", "accuracy"];
    const REASONING: [&str; 3] = ["reasoning", "steps", "completeness"];
    const RETRIEVAL: [&str; 4] = ["retrieval", "query", "result", "template"];
    const CLASSIFICATION: [&str; 3] = ["intent", "entity", "scope"];

    if OUTPUT_QUALITY.iter().any(|k| lower.contains(k)) {
        "output_quality".to_string()
    } else if REASONING.iter().any(|k| lower.contains(k)) {
        "reasoning".to_string()
    } else if RETRIEVAL.iter().any(|k| lower.contains(k)) {
        "retrieval".to_string()
    } else if CLASSIFICATION.iter().any(|k| lower.contains(k)) {
        "classification".to_string()
    } else {
        "output_quality".to_string()
    }
}

fn parse_hypotheses(text: &str) -> Option<Vec<String>> {
    let re = Regex::new(r"(?s)\[.*\]").ok()?;
    let matched = re.find(text)?;
    serde_json::from_str(matched.as_str()).ok()
}

/// Hardcoded hypothesis table keyed by the criterion-id suffix (after the
/// `ec:` prefix), used when no LLM is configured or generation fails.
/// Grounded on `analyzer.py`'s `_fallback_hypotheses`.
fn fallback_hypotheses(criterion_id: &str) -> Vec<String> {
    let suffix = criterion_id.strip_prefix("ec:").unwrap_or(criterion_id);
    match suffix {
        "source-citation" => vec![
            "Synthesizer prompt does not instruct the model to cite sources explicitly".to_string(),
            "Retrieved evidence lacks stable identifiers to cite".to_string(),
        ],
        "answer-relevance" => vec![
            "Intent classification is misrouting queries to the wrong retrieval strategy".to_string(),
            "Synthesis prompt does not constrain the model to the retrieved evidence".to_string(),
        ],
        "reasoning-steps" => vec![
            "Synthesizer prompt does not ask for an explicit reasoning chain".to_string(),
            "Responses are too short to contain connective reasoning language".to_string(),
        ],
        "completeness" => vec![
            "Search planner is under-retrieving: too few graph results reach the synthesizer".to_string(),
            "Synthesizer prompt caps response length too aggressively".to_string(),
        ],
        "factual-accuracy" => vec![
            "Graph retrieval returns stale or sparse nodes for this entity type".to_string(),
            "Synthesizer falls back to the LLM's prior knowledge when evidence is thin".to_string(),
        ],
        "intent-accuracy" => vec![
            "Intent examples in intents.yaml don't cover this query phrasing".to_string(),
            "Heuristic classifier fallback is firing instead of the LLM classifier".to_string(),
        ],
        "entity-extraction" => vec![
            "Entity catalog is missing aliases for this query's terminology".to_string(),
        ],
        "template-selection" => vec![
            "Cypher template entity-type patterns don't match this entity's surface form".to_string(),
        ],
        _ => vec!["Root cause not yet characterized for this criterion".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_pattern_type_classifies_by_keyword() {
        assert_eq!(infer_pattern_type("ec:source-citation"), "output_quality");
        assert_eq!(infer_pattern_type("ec:reasoning-steps"), "reasoning");
        assert_eq!(infer_pattern_type("ec:template-selection"), "retrieval");
        assert_eq!(infer_pattern_type("ec:scope-detection"), "classification");
        assert_eq!(infer_pattern_type("ec:safety"), "output_quality");
    }

    #[test]
    fn parse_hypotheses_extracts_json_array_from_prose() {
        let text = "Here you go:\n[\"a\", \"b\"]\nhope that helps";
        assert_eq!(parse_hypotheses(text), Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn parse_hypotheses_none_when_no_array_present() {
        assert_eq!(parse_hypotheses("no array here"), None);
    }

    #[test]
    fn fallback_hypotheses_has_entries_for_known_criteria() {
        assert!(!fallback_hypotheses("ec:source-citation").is_empty());
        assert!(!fallback_hypotheses("ec:unknown-criterion").is_empty());
    }
}
