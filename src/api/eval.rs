//! `GET /evaluations` and `GET /evaluation-criteria`: read access onto the
//! critic's persisted scores and its configured rubric.

use crate::api::{ApiError, AppState};
use crate::config::CriterionSpec;
use crate::types::EvaluationRecord;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct ListEvaluationsParams {
    agent_name: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_evaluations(
    State(state): State<AppState>,
    Query(params): Query<ListEvaluationsParams>,
) -> Result<Json<Vec<EvaluationRecord>>, ApiError> {
    let records =
        crate::critic::list_evaluations(&state.graph, params.agent_name.as_deref(), params.limit).await?;
    Ok(Json(records))
}

pub async fn list_criteria(
    State(state): State<AppState>,
) -> Json<HashMap<String, Vec<CriterionSpec>>> {
    Json(state.eval_criteria.criteria.clone())
}
