//! The seven optimizer routes: offline failure mining, variant generation,
//! A/B testing, and the two human-gated promotions (pattern approval and
//! version activation).
//!
//! Grounded on `routes.py`'s `/optimizer/*` group and `runner.py`.

use crate::api::{ApiError, AppState};
use crate::error::EngineError;
use crate::providers::get_provider;
use crate::types::{FailurePattern, PatternStatus, PromptVersion, TestResult};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListPatternsParams {
    status: Option<String>,
    agent_name: Option<String>,
}

fn parse_status(raw: &str) -> Result<PatternStatus, ApiError> {
    match raw {
        "detected" => Ok(PatternStatus::Detected),
        "reviewing" => Ok(PatternStatus::Reviewing),
        "addressing" => Ok(PatternStatus::Addressing),
        "resolved" => Ok(PatternStatus::Resolved),
        other => Err(ApiError(EngineError::Validation(format!(
            "unknown pattern status: {other}"
        )))),
    }
}

pub async fn list_patterns(
    State(state): State<AppState>,
    Query(params): Query<ListPatternsParams>,
) -> Result<Json<Vec<FailurePattern>>, ApiError> {
    let status = params.status.as_deref().map(parse_status).transpose()?;
    let patterns = state
        .analyzer
        .get_patterns(status, params.agent_name.as_deref())
        .await?;
    Ok(Json(patterns))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub agent_name: Option<String>,
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<Vec<FailurePattern>>, ApiError> {
    let provider = get_provider(&state.settings, &state.providers_config);
    let patterns = state
        .analyzer
        .analyze(req.agent_name.as_deref(), provider.as_ref())
        .await?;
    Ok(Json(patterns))
}

#[derive(Debug, Serialize)]
pub struct ApprovePatternResponse {
    pub success: bool,
    pub pattern_id: String,
}

pub async fn approve_pattern(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApprovePatternResponse>, ApiError> {
    state
        .analyzer
        .update_pattern_status(&id, PatternStatus::Reviewing)
        .await?;
    Ok(Json(ApprovePatternResponse {
        success: true,
        pattern_id: id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TestVariantsRequest {
    pub pattern_id: String,
    #[serde(default = "default_num_variants")]
    pub num_variants: usize,
}

fn default_num_variants() -> usize {
    3
}

pub async fn test_variants(
    State(state): State<AppState>,
    Json(req): Json<TestVariantsRequest>,
) -> Result<Json<Vec<TestResult>>, ApiError> {
    let patterns = state.analyzer.get_patterns(None, None).await?;
    let pattern = patterns
        .into_iter()
        .find(|p| p.id == req.pattern_id)
        .ok_or_else(|| {
            ApiError(EngineError::Validation(format!(
                "unknown failure pattern: {}",
                req.pattern_id
            )))
        })?;

    let provider = get_provider(&state.settings, &state.providers_config);
    let variants = state
        .generator
        .generate_variants(&pattern, req.num_variants, provider.as_ref())
        .await;
    if variants.is_empty() {
        return Err(ApiError(EngineError::ProviderUnavailable(
            "no LLM provider available to generate prompt variants".to_string(),
        )));
    }

    let test_queries = crate::optimizer::TestRunner::load_test_queries(&state.test_queries, &pattern.agent_name);
    let results = state
        .runner
        .run_tests(&variants, &test_queries, &state.deps, provider.as_ref())
        .await;

    for result in &results {
        if let Err(e) = state
            .generator
            .apply_variant(
                &result.variant,
                result.performance_delta,
                Some(serde_json::json!({
                    "scores": result.scores,
                    "baseline_scores": result.baseline_scores,
                    "passed_count": result.passed_count,
                    "failed_count": result.failed_count,
                })),
            )
            .await
        {
            tracing::warn!(variant = %result.variant.id, error = %e, "failed to persist tested variant");
        }
    }

    Ok(Json(results))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Query(params): Query<ListVersionsParams>,
) -> Result<Json<Vec<PromptVersion>>, ApiError> {
    let history = state
        .prompt_registry
        .get_version_history(&params.agent_name, params.limit)
        .await?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
pub struct ListVersionsParams {
    pub agent_name: String,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct ActivateVersionRequest {
    pub agent_name: String,
    pub approved_by: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateVersionResponse {
    pub success: bool,
    pub version_id: String,
}

pub async fn activate_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActivateVersionRequest>,
) -> Result<Json<ActivateVersionResponse>, ApiError> {
    state
        .prompt_registry
        .activate_version(&req.agent_name, &id, &req.approved_by)
        .await?;
    Ok(Json(ActivateVersionResponse {
        success: true,
        version_id: id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub agent_name: String,
    #[serde(default)]
    pub to_version: Option<String>,
}

pub async fn rollback(
    State(state): State<AppState>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<PromptVersion>, ApiError> {
    let version = state
        .prompt_registry
        .rollback(&req.agent_name, req.to_version.as_deref())
        .await?;
    Ok(Json(version))
}
