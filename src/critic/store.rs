//! Graph-backed persistence for `EvaluationRecord`s: the `Evaluation`
//! nodes the optimizer's `FailureAnalyzer` mines by `scores_json`.
//!
//! Grounded on the same `MERGE`-by-id idiom `optimizer::analyzer`
//! already uses for `FailurePattern`.

use crate::error::EngineResult;
use crate::graph::GraphClient;
use crate::types::{EvaluationRecord, PropertyValue, SerializedRecord, SerializedValue};
use std::collections::HashMap;

pub async fn persist_evaluation(graph: &GraphClient, record: &EvaluationRecord) -> EngineResult<()> {
    const CYPHER: &str = "MERGE (e:Evaluation {id: $id}) SET \
         e.agent_name = $agent_name, e.query = $query, e.response = $response, \
         e.scores_json = $scores_json, e.composite_score = $composite_score, \
         e.feedback = $feedback, e.conversation_id = $conversation_id, \
         e.created_at = $created_at \
         RETURN e";
    let mut params = HashMap::new();
    params.insert("id".to_string(), PropertyValue::Str(record.id.clone()));
    params.insert("agent_name".to_string(), PropertyValue::Str(record.agent_name.clone()));
    params.insert("query".to_string(), PropertyValue::Str(record.query.clone()));
    params.insert("response".to_string(), PropertyValue::Str(record.response.clone()));
    params.insert(
        "scores_json".to_string(),
        PropertyValue::Str(serde_json::to_string(&record.scores).unwrap_or_default()),
    );
    params.insert(
        "composite_score".to_string(),
        PropertyValue::Float(record.composite_score),
    );
    params.insert(
        "feedback".to_string(),
        match &record.feedback {
            Some(f) => PropertyValue::Str(f.clone()),
            None => PropertyValue::Null,
        },
    );
    params.insert(
        "conversation_id".to_string(),
        match &record.conversation_id {
            Some(c) => PropertyValue::Str(c.clone()),
            None => PropertyValue::Null,
        },
    );
    params.insert(
        "created_at".to_string(),
        PropertyValue::Str(record.created_at.to_rfc3339()),
    );
    graph.execute_template(CYPHER, &params).await?;
    Ok(())
}

pub async fn list_evaluations(
    graph: &GraphClient,
    agent_name: Option<&str>,
    limit: i64,
) -> EngineResult<Vec<EvaluationRecord>> {
    let cypher = "MATCH (e:Evaluation) WHERE ($agent_name IS NULL OR e.agent_name = $agent_name) \
         RETURN e ORDER BY e.created_at DESC LIMIT $limit";
    let mut params = HashMap::new();
    params.insert(
        "agent_name".to_string(),
        match agent_name {
            Some(a) => PropertyValue::Str(a.to_string()),
            None => PropertyValue::Null,
        },
    );
    params.insert("limit".to_string(), PropertyValue::Int(limit));
    let records = graph.execute_template(cypher, &params).await?;
    Ok(records.iter().filter_map(|r| record_to_evaluation(r, "e")).collect())
}

fn prop_str(properties: &HashMap<String, PropertyValue>, key: &str) -> String {
    match properties.get(key) {
        Some(PropertyValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

fn record_to_evaluation(record: &SerializedRecord, column: &str) -> Option<EvaluationRecord> {
    let properties = match record.get(column) {
        Some(SerializedValue::Node { properties, .. }) => properties,
        _ => return None,
    };
    let scores: HashMap<String, f64> =
        serde_json::from_str(&prop_str(properties, "scores_json")).unwrap_or_default();
    let composite_score = match properties.get("composite_score") {
        Some(PropertyValue::Float(f)) => *f,
        Some(PropertyValue::Int(i)) => *i as f64,
        _ => 0.0,
    };
    let created_at = match properties.get("created_at") {
        Some(PropertyValue::Str(s)) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now),
        _ => chrono::Utc::now(),
    };
    let feedback = match properties.get("feedback") {
        Some(PropertyValue::Str(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    let conversation_id = match properties.get("conversation_id") {
        Some(PropertyValue::Str(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };

    Some(EvaluationRecord {
        id: prop_str(properties, "id"),
        agent_name: prop_str(properties, "agent_name"),
        query: prop_str(properties, "query"),
        response: prop_str(properties, "response"),
        scores,
        composite_score,
        feedback,
        conversation_id,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_to_evaluation_defaults_missing_composite_score_to_zero() {
        let mut record = SerializedRecord::new();
        record.insert(
            "e".to_string(),
            SerializedValue::Node {
                labels: vec!["Evaluation".to_string()],
                properties: HashMap::from([(
                    "id".to_string(),
                    PropertyValue::Str("eval:20260101-0001".to_string()),
                )]),
                element_id: None,
            },
        );
        let parsed = record_to_evaluation(&record, "e").unwrap();
        assert_eq!(parsed.composite_score, 0.0);
        assert_eq!(parsed.id, "eval:20260101-0001");
    }
}
