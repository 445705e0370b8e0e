//! `GET /health` and `GET /stats`: liveness/readiness and corpus sizing.

use crate::api::{ApiError, AppState};
use crate::types::{PropertyValue, SerializedValue};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub neo4j: bool,
    pub chromadb_entries: i64,
}

pub async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let neo4j = state.graph.ping().await;
    let chromadb_entries = state.deps.vector_store.count().await.unwrap_or(0) as i64;
    let status = if neo4j { "ok" } else { "degraded" };
    Ok(Json(HealthResponse {
        status,
        neo4j,
        chromadb_entries,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_nodes: i64,
    pub total_relationships: i64,
    pub nodes_by_label: HashMap<String, i64>,
    pub relationships_by_type: HashMap<String, i64>,
}

fn scalar_int(record: &HashMap<String, SerializedValue>, column: &str) -> i64 {
    match record.get(column) {
        Some(SerializedValue::Scalar(PropertyValue::Int(i))) => *i,
        _ => 0,
    }
}

fn scalar_str(record: &HashMap<String, SerializedValue>, column: &str) -> String {
    match record.get(column) {
        Some(SerializedValue::Scalar(PropertyValue::Str(s))) => s.clone(),
        _ => String::new(),
    }
}

pub async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let empty = HashMap::new();

    let total_nodes_rows = state
        .graph
        .execute_template("MATCH (n) RETURN count(n) AS total", &empty)
        .await?;
    let total_nodes = total_nodes_rows.first().map(|r| scalar_int(r, "total")).unwrap_or(0);

    let total_rels_rows = state
        .graph
        .execute_template("MATCH ()-[r]->() RETURN count(r) AS total", &empty)
        .await?;
    let total_relationships = total_rels_rows.first().map(|r| scalar_int(r, "total")).unwrap_or(0);

    let by_label_rows = state
        .graph
        .execute_template(
            "MATCH (n) UNWIND labels(n) AS label RETURN label AS label, count(*) AS total",
            &empty,
        )
        .await?;
    let nodes_by_label = by_label_rows
        .iter()
        .map(|r| (scalar_str(r, "label"), scalar_int(r, "total")))
        .collect();

    let by_type_rows = state
        .graph
        .execute_template(
            "MATCH ()-[r]->() RETURN type(r) AS rel_type, count(*) AS total",
            &empty,
        )
        .await?;
    let relationships_by_type = by_type_rows
        .iter()
        .map(|r| (scalar_str(r, "rel_type"), scalar_int(r, "total")))
        .collect();

    Ok(Json(StatsResponse {
        total_nodes,
        total_relationships,
        nodes_by_label,
        relationships_by_type,
    }))
}
