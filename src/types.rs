//! Core data model shared across the retrieval pipeline, critic, and
//! optimizer: the query context (as an ordered stage-outcome chain), the
//! serialization contract for graph results, vector hits, evaluation
//! records, and the prompt-optimization types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Lookup,
    Exploration,
    PathTrace,
    Comparison,
    Aggregation,
    CoverageCheck,
    Definition,
    Expansion,
    OutOfScope,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::Lookup,
        Intent::Exploration,
        Intent::PathTrace,
        Intent::Comparison,
        Intent::Aggregation,
        Intent::CoverageCheck,
        Intent::Definition,
        Intent::Expansion,
        Intent::OutOfScope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Lookup => "lookup",
            Intent::Exploration => "exploration",
            Intent::PathTrace => "path_trace",
            Intent::Comparison => "comparison",
            Intent::Aggregation => "aggregation",
            Intent::CoverageCheck => "coverage_check",
            Intent::Definition => "definition",
            Intent::Expansion => "expansion",
            Intent::OutOfScope => "out_of_scope",
        }
    }

    pub fn parse(s: &str) -> Option<Intent> {
        Self::ALL.into_iter().find(|i| i.as_str() == s.trim())
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Serialization contract (REDESIGN FLAG #2): tagged union, never duck-typed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SerializedValue {
    Node {
        labels: Vec<String>,
        properties: HashMap<String, PropertyValue>,
        element_id: Option<String>,
    },
    Relationship {
        #[serde(rename = "type")]
        rel_type: String,
        properties: HashMap<String, PropertyValue>,
        start_node: Box<SerializedValue>,
        end_node: Box<SerializedValue>,
    },
    List(Vec<SerializedValue>),
    Map(HashMap<String, SerializedValue>),
    Scalar(PropertyValue),
}

impl SerializedValue {
    /// The node `id` property, when this value is a node carrying one.
    pub fn as_node_id(&self) -> Option<&str> {
        match self {
            SerializedValue::Node { properties, .. } => match properties.get("id") {
                Some(PropertyValue::Str(s)) if !s.is_empty() => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn first_label(&self) -> Option<&str> {
        match self {
            SerializedValue::Node { labels, .. } => labels.first().map(|s| s.as_str()),
            _ => None,
        }
    }

    /// The node `name` property, when this value is a node carrying one.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            SerializedValue::Node { properties, .. } => match properties.get("name") {
                Some(PropertyValue::Str(s)) if !s.is_empty() => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A single result row: column name -> serialized value.
pub type SerializedRecord = HashMap<String, SerializedValue>;

// ---------------------------------------------------------------------------
// Vector hit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSourceType {
    KgNode,
    WebSearch,
    Paper,
    UserNote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub source_type: VectorSourceType,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_label: Option<String>,
    pub title: String,
    pub text: String,
    /// Cosine similarity normalized to 0 = opposite, 1 = identical.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector: Option<String>,
}

// ---------------------------------------------------------------------------
// Search strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalType {
    GraphOnly,
    Hybrid,
    VectorFirst,
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStrategy {
    pub retrieval_type: Option<RetrievalType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cypher_template: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, PropertyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Source item (synthesizer citations)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Query context as an ordered stage-outcome chain (REDESIGN FLAG #1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutcome {
    IntentClassified {
        intent: Intent,
        entities: Vec<String>,
    },
    Planned {
        strategy: SearchStrategy,
    },
    Retrieved {
        graph_results: Vec<SerializedRecord>,
        vector_results: Vec<VectorHit>,
        cypher_executed: Vec<String>,
    },
    WebExpanded {
        web_results: Vec<VectorHit>,
    },
    Synthesized {
        answer: String,
        sources: Vec<SourceItem>,
        confidence: f64,
    },
    Skipped {
        stage: String,
        reason: String,
    },
    Failed {
        stage: String,
        error: String,
    },
}

/// Mutable context threaded through the pipeline for a single query.
/// Required inputs plus an append-only chain of stage outcomes, so
/// "ran and succeeded / failed / was skipped" is an observable, matchable
/// distinction rather than a nullable-field convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    pub query: String,
    pub outcomes: Vec<StageOutcome>,
}

impl QueryContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: StageOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn intent(&self) -> Option<Intent> {
        self.outcomes.iter().find_map(|o| match o {
            StageOutcome::IntentClassified { intent, .. } => Some(*intent),
            _ => None,
        })
    }

    pub fn entities(&self) -> &[String] {
        self.outcomes
            .iter()
            .find_map(|o| match o {
                StageOutcome::IntentClassified { entities, .. } => Some(entities.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn strategy(&self) -> Option<&SearchStrategy> {
        self.outcomes.iter().find_map(|o| match o {
            StageOutcome::Planned { strategy } => Some(strategy),
            _ => None,
        })
    }

    pub fn graph_results(&self) -> &[SerializedRecord] {
        self.outcomes
            .iter()
            .find_map(|o| match o {
                StageOutcome::Retrieved { graph_results, .. } => Some(graph_results.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn vector_results(&self) -> &[VectorHit] {
        self.outcomes
            .iter()
            .find_map(|o| match o {
                StageOutcome::Retrieved { vector_results, .. } => Some(vector_results.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn cypher_executed(&self) -> &[String] {
        self.outcomes
            .iter()
            .find_map(|o| match o {
                StageOutcome::Retrieved {
                    cypher_executed, ..
                } => Some(cypher_executed.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn web_results(&self) -> &[VectorHit] {
        self.outcomes
            .iter()
            .find_map(|o| match o {
                StageOutcome::WebExpanded { web_results } => Some(web_results.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn answer(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match o {
            StageOutcome::Synthesized { answer, .. } => Some(answer.as_str()),
            _ => None,
        })
    }

    pub fn sources(&self) -> &[SourceItem] {
        self.outcomes
            .iter()
            .find_map(|o| match o {
                StageOutcome::Synthesized { sources, .. } => Some(sources.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub fn confidence(&self) -> Option<f64> {
        self.outcomes.iter().find_map(|o| match o {
            StageOutcome::Synthesized { confidence, .. } => Some(*confidence),
            _ => None,
        })
    }

    /// First error recorded by any stage, if any (spec.md's nullable `error` field).
    pub fn error(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match o {
            StageOutcome::Failed { error, .. } => Some(error.as_str()),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Evaluation criterion / record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationCriterion {
    pub id: String,
    pub name: String,
    pub principle_id: String,
    pub agent_target: String,
    pub description: String,
    pub weight: f64,
    pub scoring_rubric: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub agent_name: String,
    pub query: String,
    pub response: String,
    pub scores: HashMap<String, f64>,
    pub composite_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ---------------------------------------------------------------------------
// Failure pattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStatus {
    Detected,
    Reviewing,
    Addressing,
    Resolved,
}

impl PatternStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::Detected => "detected",
            PatternStatus::Reviewing => "reviewing",
            PatternStatus::Addressing => "addressing",
            PatternStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "detected" => Some(Self::Detected),
            "reviewing" => Some(Self::Reviewing),
            "addressing" => Some(Self::Addressing),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub id: String,
    pub agent_name: String,
    pub criterion_id: String,
    pub pattern_type: String,
    pub description: String,
    pub frequency: usize,
    pub avg_score: f64,
    #[serde(default)]
    pub sample_queries: Vec<String>,
    #[serde(default)]
    pub sample_responses: Vec<String>,
    #[serde(default)]
    pub root_cause_hypotheses: Vec<String>,
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
    pub status: PatternStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl FailurePattern {
    pub fn pattern_key(&self) -> String {
        format!("{}:{}", self.agent_name, self.criterion_id)
    }
}

// ---------------------------------------------------------------------------
// Prompt variant / version / test result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVariant {
    pub id: String,
    pub agent_name: String,
    pub prompt_content: String,
    pub rationale: String,
    #[serde(default)]
    pub addresses_hypotheses: Vec<usize>,
    #[serde(default)]
    pub failure_pattern_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: String,
    pub agent_name: String,
    pub version: String,
    pub prompt_content: String,
    pub prompt_hash: String,
    pub prompt_path: String,
    pub is_active: bool,
    pub user_approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_pattern_id: Option<String>,
    pub performance_delta: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<serde_json::Value>,
    pub rationale: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_intent: Option<String>,
    #[serde(default)]
    pub expected_entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_retrieval: Option<String>,
    pub min_confidence: f64,
    pub min_sources: usize,
    pub min_results: usize,
    pub no_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerQueryResult {
    pub query: String,
    pub scores: HashMap<String, f64>,
    pub composite_score: f64,
    pub assertions_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub variant: PromptVariant,
    pub scores: HashMap<String, f64>,
    pub baseline_scores: HashMap<String, f64>,
    pub per_query_scores: Vec<PerQueryResult>,
    pub performance_delta: f64,
    pub test_queries_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl TestResult {
    pub fn pass_rate(&self) -> f64 {
        if self.test_queries_count == 0 {
            0.0
        } else {
            self.passed_count as f64 / self.test_queries_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_context_accessors_reflect_pushed_outcomes() {
        let mut ctx = QueryContext::new("What is ReAct?");
        assert!(ctx.intent().is_none());

        ctx.push(StageOutcome::IntentClassified {
            intent: Intent::Lookup,
            entities: vec!["m:react".to_string()],
        });
        assert_eq!(ctx.intent(), Some(Intent::Lookup));
        assert_eq!(ctx.entities(), &["m:react".to_string()]);
        assert!(ctx.error().is_none());
    }

    #[test]
    fn failed_stage_is_observable_not_a_null_field() {
        let mut ctx = QueryContext::new("q");
        ctx.push(StageOutcome::Failed {
            stage: "graph_retriever".into(),
            error: "timeout".into(),
        });
        assert_eq!(ctx.error(), Some("timeout"));
        assert!(ctx.graph_results().is_empty());
    }

    #[test]
    fn intent_round_trips_through_display_and_parse() {
        for intent in Intent::ALL {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("nonsense"), None);
    }

    #[test]
    fn serialized_value_never_reaches_a_driver_type() {
        let node = SerializedValue::Node {
            labels: vec!["Method".to_string()],
            properties: HashMap::from([(
                "id".to_string(),
                PropertyValue::Str("m:react".to_string()),
            )]),
            element_id: Some("4:abc:1".to_string()),
        };
        assert_eq!(node.as_node_id(), Some("m:react"));
        assert_eq!(node.first_label(), Some("Method"));

        let json = serde_json::to_string(&node).unwrap();
        let round_tripped: SerializedValue = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped, node);
    }
}
