//! `POST /query`: run the five-stage pipeline once, then score and persist
//! every stage's critic evaluation before responding.

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::providers::build_override_provider;
use crate::types::{SerializedRecord, SourceItem, VectorHit};
use crate::{critic, pipeline};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub llm_model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: Option<String>,
    pub intent: Option<String>,
    pub entities: Vec<String>,
    pub confidence: Option<f64>,
    pub sources: Vec<SourceItem>,
    pub vector_results: Vec<VectorHit>,
    pub web_results: Vec<VectorHit>,
    pub web_query: Option<String>,
    pub cypher_executed: Vec<String>,
    pub kg_results: Vec<SerializedRecord>,
    pub error: Option<String>,
}

pub async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError(EngineError::Validation(
            "query must not be empty".to_string(),
        )));
    }

    let mut deps = (*state.deps).clone();
    if let Some(provider_name) = &req.llm_provider {
        let override_provider = build_override_provider(
            &state.settings,
            &state.providers_config,
            provider_name,
            req.llm_model.as_deref(),
        )
        .ok_or_else(|| {
            ApiError(EngineError::Validation(format!(
                "provider '{provider_name}' is not configured or has no API key"
            )))
        })?;
        deps.llm = Some(Arc::new(override_provider));
    }

    let ctx = pipeline::run_pipeline(&req.query, &deps).await;

    let provider = deps.llm.as_deref();
    let evaluations = state.evaluator.evaluate_pipeline(&ctx, None, provider).await;
    for evaluation in &evaluations {
        if let Err(e) = critic::persist_evaluation(&state.graph, evaluation).await {
            warn!(agent = %evaluation.agent_name, error = %e, "failed to persist evaluation");
        }
    }
    let web_query = ctx.strategy().and_then(|s| s.vector_query.clone());

    Ok(Json(QueryResponse {
        answer: ctx.answer().map(|s| s.to_string()),
        intent: ctx.intent().map(|i| i.to_string()),
        entities: ctx.entities().to_vec(),
        confidence: ctx.confidence(),
        sources: ctx.sources().to_vec(),
        vector_results: ctx.vector_results().to_vec(),
        web_results: ctx.web_results().to_vec(),
        web_query,
        cypher_executed: ctx.cypher_executed().to_vec(),
        kg_results: ctx.graph_results().to_vec(),
        error: ctx.error().map(|s| s.to_string()),
    }))
}
