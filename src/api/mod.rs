//! HTTP surface: one router assembled from a submodule per concern,
//! mirroring `routes.py`'s grouping — query, health/stats, graph, eval,
//! optimizer.

pub mod eval;
pub mod graph;
pub mod health;
pub mod optimizer;
pub mod query;

use crate::config::{ProvidersConfig, Settings, TestQueriesConfig};
use crate::critic::CriticEvaluator;
use crate::error::EngineError;
use crate::graph::GraphClient;
use crate::optimizer::{FailureAnalyzer, PromptRegistry, TestRunner, VariantGenerator};
use crate::pipeline::PipelineDeps;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// Everything a handler needs, cloned cheaply per request via `Arc`s
/// inside (`axum::extract::State` clones this struct itself).
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<PipelineDeps>,
    pub settings: Arc<Settings>,
    pub providers_config: Arc<ProvidersConfig>,
    pub graph: GraphClient,
    pub evaluator: Arc<CriticEvaluator>,
    pub eval_criteria: Arc<crate::config::EvaluationCriteriaConfig>,
    pub prompt_registry: Arc<PromptRegistry>,
    pub analyzer: Arc<FailureAnalyzer>,
    pub generator: Arc<VariantGenerator>,
    pub runner: Arc<TestRunner>,
    pub test_queries: Arc<TestQueriesConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/query", post(query::handle_query))
        .route("/health", get(health::handle_health))
        .route("/stats", get(health::handle_stats))
        .route("/graph/principles", get(graph::list_principles))
        .route("/graph/nodes/propose", post(graph::propose_node))
        .route("/graph/nodes/approve", post(graph::approve_node))
        .route("/evaluations", get(eval::list_evaluations))
        .route("/evaluation-criteria", get(eval::list_criteria))
        .route("/optimizer/patterns", get(optimizer::list_patterns))
        .route("/optimizer/analyze", post(optimizer::analyze))
        .route(
            "/optimizer/patterns/:id/approve",
            post(optimizer::approve_pattern),
        )
        .route("/optimizer/test", post(optimizer::test_variants))
        .route(
            "/optimizer/versions/:id/activate",
            post(optimizer::activate_version),
        )
        .route("/optimizer/rollback", post(optimizer::rollback))
        .route("/optimizer/versions", get(optimizer::list_versions))
        .with_state(state)
}

/// Wraps `EngineError` for the HTTP boundary; `status_code()` already
/// carries the full taxonomy-to-4xx/5xx mapping (§7).
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
