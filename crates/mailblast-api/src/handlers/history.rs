//! Delivery history handlers

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use mailblast_common::types::CurrentUser;
use mailblast_storage::DeliveryHistory;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AppState;
use crate::error::{api_error, ApiError};

const MAX_LIMIT: i64 = 200;

/// Query parameters for listing history
#[derive(Debug, Deserialize)]
pub struct ListHistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Page of history rows, newest first
#[derive(Debug, Serialize, Deserialize)]
pub struct ListHistoryResponse {
    pub items: Vec<DeliveryHistory>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List delivery history
///
/// GET /api/v1/history
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListHistoryQuery>,
) -> Result<Json<ListHistoryResponse>, ApiError> {
    let limit = query.limit.clamp(1, MAX_LIMIT);
    let offset = query.offset.max(0);

    let items = state
        .history
        .list(user.id, limit, offset)
        .await
        .map_err(api_error)?;
    let total = state.history.count(user.id).await.map_err(api_error)?;

    Ok(Json(ListHistoryResponse {
        items,
        total,
        limit,
        offset,
    }))
}
