use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rr_common::db::{insert_prediction, recent_predictions, StoredPrediction};
use rr_common::ingest::OrderDraft;
use rr_common::jobs::PredictionRecord;
use rr_common::risk::RiskLevel;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction_id: Uuid,
    pub return_probability: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub model_version: String,
}

/// Score one order synchronously. Validation failures are a 400; the
/// stored record lets the dashboard list ad-hoc predictions next to
/// batch results.
pub async fn submit_prediction(
    State(state): State<SharedState>,
    auth: AuthUser,
    Json(draft): Json<OrderDraft>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let order = draft.validate().map_err(ApiError::BadRequest)?;
    let score = state.scorer.score(&order)?;

    let risk_level = state.orchestrator.thresholds.bucket(score.return_probability);
    let record = PredictionRecord::completed(
        order,
        score.return_probability,
        risk_level,
        score.confidence,
        score.model_version.clone(),
    );

    let prediction_id = insert_prediction(&state.pool, auth.principal, &record).await?;

    Ok(Json(PredictionResponse {
        prediction_id,
        return_probability: score.return_probability,
        risk_level,
        confidence: score.confidence,
        model_version: score.model_version,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct RecentPredictionsResponse {
    pub items: Vec<StoredPrediction>,
}

pub async fn recent(
    State(state): State<SharedState>,
    auth: AuthUser,
    Query(params): Query<RecentParams>,
) -> Result<Json<RecentPredictionsResponse>, ApiError> {
    if params.limit < 1 || params.limit > 500 {
        return Err(ApiError::BadRequest(
            "limit must be between 1 and 500".into(),
        ));
    }

    let items = recent_predictions(&state.pool, auth.principal, params.limit).await?;
    Ok(Json(RecentPredictionsResponse { items }))
}
