//! Graph retrieval collaborator: a pooled `neo4rs::Graph` client, named-
//! parameter Cypher execution, and the serialization contract that turns
//! driver-native nodes/relationships into the plain `SerializedValue` tree
//! defined in `types.rs` before anything leaves this module.
//!
//! Grounded on `dashflow-neo4j`'s `Neo4jGraph` for connection setup, and on
//! its own acknowledged gap ("parsing the query to extract RETURN column
//! names" — `neo4j_graph.rs`) which this module actually implements.

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::types::{PropertyValue, SerializedRecord, SerializedValue};
use neo4rs::{BoltType, Graph, Query};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Shared, cloneable handle to the graph database. `neo4rs::Graph` is
/// already pool-backed internally, so cloning the `Arc` is the idiomatic
/// way to hand every pipeline task its own reference.
#[derive(Clone)]
pub struct GraphClient {
    graph: Arc<Graph>,
    database: String,
}

impl GraphClient {
    pub async fn connect(settings: &Settings) -> EngineResult<Self> {
        let graph = Graph::new(
            &settings.neo4j_uri,
            &settings.neo4j_username,
            &settings.neo4j_password,
        )
        .await
        .map_err(|e| EngineError::Retrieval(format!("failed to connect to Neo4j: {e}")))?;

        Ok(Self {
            graph: Arc::new(graph),
            database: settings.neo4j_database.clone(),
        })
    }

    /// Execute a parameterized Cypher template. `cypher` must already be the
    /// static template text (never string-interpolated from user input);
    /// `params` are bound as named parameters.
    #[instrument(skip(self, params))]
    pub async fn execute_template(
        &self,
        cypher: &str,
        params: &HashMap<String, PropertyValue>,
    ) -> EngineResult<Vec<SerializedRecord>> {
        let mut query = Query::new(cypher.to_string());
        for (key, value) in params {
            query = query.param(key, property_value_to_bolt(value));
        }

        let mut result = self
            .graph
            .execute(query)
            .await
            .map_err(|e| EngineError::Retrieval(format!("Cypher execution failed: {e}")))?;

        let columns = return_columns(cypher);
        let mut records = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| EngineError::Retrieval(format!("failed to read result row: {e}")))?
        {
            records.push(serialize_row(&row, &columns));
        }
        Ok(records)
    }

    /// One-hop enrichment for `vector_first` results with no graph
    /// template: fetch each node by id and its immediate neighbors.
    /// Grounded on `graph_retriever.py`'s `_enrich_from_neo4j`.
    #[instrument(skip(self))]
    pub async fn enrich_nodes(&self, node_ids: &[String]) -> EngineResult<Vec<SerializedRecord>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }
        const ENRICH_CYPHER: &str = "MATCH (n) WHERE n.id IN $node_ids \
             OPTIONAL MATCH (n)-[r]-(related) \
             RETURN n, collect(DISTINCT {node: related, rel_type: type(r)}) AS connections";

        let query = Query::new(ENRICH_CYPHER.to_string()).param(
            "node_ids",
            BoltType::List(neo4rs::BoltList::from(
                node_ids
                    .iter()
                    .map(|id| BoltType::String(neo4rs::BoltString::from(id.as_str())))
                    .collect::<Vec<_>>(),
            )),
        );

        let mut result = self
            .graph
            .execute(query)
            .await
            .map_err(|e| EngineError::Retrieval(format!("enrichment query failed: {e}")))?;

        let columns = vec!["n".to_string(), "connections".to_string()];
        let mut records = Vec::new();
        while let Some(row) = result
            .next()
            .await
            .map_err(|e| EngineError::Retrieval(format!("failed to read enrichment row: {e}")))?
        {
            records.push(serialize_row(&row, &columns));
        }
        Ok(records)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Lightweight connectivity probe for the `/health` endpoint.
    pub async fn ping(&self) -> bool {
        match self.graph.execute(Query::new("RETURN 1".to_string())).await {
            Ok(mut result) => result.next().await.is_ok(),
            Err(e) => {
                warn!(error = %e, "Neo4j health check failed");
                false
            }
        }
    }
}

/// Extract the column aliases of a Cypher statement's final `RETURN`
/// clause, so row values can be addressed by name without the driver
/// exposing result-set metadata directly.
fn return_columns(cypher: &str) -> Vec<String> {
    let upper = cypher.to_uppercase();
    let Some(pos) = upper.rfind("RETURN") else {
        return Vec::new();
    };
    let clause = &cypher[pos + "RETURN".len()..];
    // Stop at a trailing ORDER BY / LIMIT / SKIP that belongs to the RETURN.
    let stop_at = ["ORDER BY", "LIMIT", "SKIP"]
        .iter()
        .filter_map(|kw| upper[pos..].find(kw).map(|i| i - "RETURN".len()))
        .min();
    let clause = match stop_at {
        Some(i) if i <= clause.len() => &clause[..i],
        _ => clause,
    };

    clause
        .split(',')
        .map(|part| {
            let part = part.trim();
            if let Some(idx) = part.to_uppercase().rfind(" AS ") {
                part[idx + 4..].trim().to_string()
            } else {
                part.split_whitespace()
                    .last()
                    .unwrap_or(part)
                    .trim()
                    .to_string()
            }
        })
        .filter(|c| !c.is_empty())
        .collect()
}

fn serialize_row(row: &neo4rs::Row, columns: &[String]) -> SerializedRecord {
    let mut out = SerializedRecord::new();
    for column in columns {
        if let Ok(node) = row.get::<neo4rs::Node>(column) {
            out.insert(column.clone(), serialize_node(&node));
            continue;
        }
        if let Ok(rel) = row.get::<neo4rs::Relation>(column) {
            out.insert(column.clone(), serialize_relation(&rel));
            continue;
        }
        if let Ok(list) = row.get::<Vec<serde_json::Value>>(column) {
            out.insert(
                column.clone(),
                SerializedValue::List(list.iter().map(json_to_serialized).collect()),
            );
            continue;
        }
        if let Ok(value) = row.get::<serde_json::Value>(column) {
            out.insert(column.clone(), json_to_serialized(&value));
            continue;
        }
        out.insert(column.clone(), SerializedValue::Scalar(PropertyValue::Null));
    }
    out
}

fn serialize_node(node: &neo4rs::Node) -> SerializedValue {
    let properties = node
        .to::<HashMap<String, serde_json::Value>>()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, json_to_property_value(&v)))
        .collect();
    SerializedValue::Node {
        labels: node.labels(),
        properties,
        element_id: Some(node.id().to_string()),
    }
}

fn serialize_relation(rel: &neo4rs::Relation) -> SerializedValue {
    let properties = rel
        .to::<HashMap<String, serde_json::Value>>()
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, json_to_property_value(&v)))
        .collect();
    // A bare relationship carries only its endpoints' internal ids; the
    // full node shape is only available when the same query also returns
    // the endpoint nodes under their own aliases.
    SerializedValue::Relationship {
        rel_type: rel.typ(),
        properties,
        start_node: Box::new(SerializedValue::Scalar(PropertyValue::Int(
            rel.start_node_id(),
        ))),
        end_node: Box::new(SerializedValue::Scalar(PropertyValue::Int(
            rel.end_node_id(),
        ))),
    }
}

fn json_to_serialized(value: &serde_json::Value) -> SerializedValue {
    match value {
        serde_json::Value::Array(items) => {
            SerializedValue::List(items.iter().map(json_to_serialized).collect())
        }
        serde_json::Value::Object(map) => SerializedValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_serialized(v)))
                .collect(),
        ),
        other => SerializedValue::Scalar(json_to_property_value(other)),
    }
}

fn json_to_property_value(value: &serde_json::Value) -> PropertyValue {
    match value {
        serde_json::Value::Null => PropertyValue::Null,
        serde_json::Value::Bool(b) => PropertyValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                PropertyValue::Int(i)
            } else {
                PropertyValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => PropertyValue::Str(s.clone()),
        other => PropertyValue::Str(other.to_string()),
    }
}

fn property_value_to_bolt(value: &PropertyValue) -> BoltType {
    match value {
        PropertyValue::Null => BoltType::Null(neo4rs::BoltNull),
        PropertyValue::Bool(b) => BoltType::Boolean(neo4rs::BoltBoolean::new(*b)),
        PropertyValue::Int(i) => BoltType::Integer(neo4rs::BoltInteger::new(*i)),
        PropertyValue::Float(f) => BoltType::Float(neo4rs::BoltFloat::new(*f)),
        PropertyValue::Str(s) => BoltType::String(neo4rs::BoltString::from(s.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_columns_parses_simple_clause() {
        let cypher = "MATCH (n:Method) RETURN n.id AS id, n.name AS name";
        assert_eq!(return_columns(cypher), vec!["id", "name"]);
    }

    #[test]
    fn return_columns_parses_bare_identifiers() {
        let cypher = "MATCH (n)-[r]-(m) RETURN n, r, m";
        assert_eq!(return_columns(cypher), vec!["n", "r", "m"]);
    }

    #[test]
    fn return_columns_strips_trailing_limit() {
        let cypher = "MATCH (n) RETURN n.id AS id ORDER BY id LIMIT 5";
        assert_eq!(return_columns(cypher), vec!["id"]);
    }

    #[test]
    fn return_columns_empty_without_return() {
        assert!(return_columns("MATCH (n) DELETE n").is_empty());
    }

    #[test]
    fn json_to_property_value_distinguishes_int_and_float() {
        assert_eq!(
            json_to_property_value(&serde_json::json!(3)),
            PropertyValue::Int(3)
        );
        assert_eq!(
            json_to_property_value(&serde_json::json!(3.5)),
            PropertyValue::Float(3.5)
        );
    }
}
