//! Dispatch handlers - Start, follow and cancel bulk runs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use mailblast_common::types::CurrentUser;
use mailblast_common::Error;
use mailblast_core::{
    DispatchOptions, DispatchOverrides, ProviderKind, RecipientSelection, RunHandle, RunProgress,
    RunReport,
};
use mailblast_storage::DispatchMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{api_error, ApiError};

/// Request body for starting a run
#[derive(Debug, Clone, Deserialize)]
pub struct StartDispatchRequest {
    pub template_id: Uuid,
    /// Explicit contacts; takes precedence over `tag`
    #[serde(default)]
    pub contact_ids: Vec<Uuid>,
    pub tag: Option<String>,
    /// Free-form dispatch mode, normalized server side
    pub mode: Option<String>,
    #[serde(default)]
    pub overrides: DispatchOverrides,
}

/// Response after a run was accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDispatchResponse {
    pub run_id: Uuid,
    pub total: usize,
    pub provider: ProviderKind,
    pub mode: DispatchMode,
}

/// State of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub total: usize,
    pub cancelled: bool,
    pub finished: bool,
    pub progress: RunProgress,
    pub report: Option<RunReport>,
}

impl RunStatusResponse {
    fn from_handle(handle: &RunHandle) -> Self {
        let report = handle.report().map(|r| (*r).clone());
        Self {
            run_id: handle.id(),
            total: handle.total(),
            cancelled: handle.is_cancelled(),
            finished: report.is_some(),
            progress: handle.progress(),
            report,
        }
    }
}

/// Start a run
///
/// POST /api/v1/dispatch
pub async fn start_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<StartDispatchRequest>,
) -> Result<(StatusCode, Json<StartDispatchResponse>), ApiError> {
    let selection = RecipientSelection::from_parts(input.contact_ids, input.tag).map_err(api_error)?;
    let inputs = state
        .inputs
        .load(user.id, input.template_id, &selection)
        .await
        .map_err(api_error)?;

    let mode = input
        .mode
        .as_deref()
        .map(DispatchMode::coerce)
        .unwrap_or_default();
    let provider = ProviderKind::from_host(&inputs.credential.host);

    let handle = state
        .engine
        .start_batch(
            user.id,
            inputs.recipients,
            inputs.template,
            inputs.credential,
            DispatchOptions {
                mode,
                overrides: input.overrides,
            },
        )
        .map_err(|e| api_error(e.into()))?;

    info!(
        user_id = %user.id,
        run_id = %handle.id(),
        total = handle.total(),
        "Dispatch requested"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartDispatchResponse {
            run_id: handle.id(),
            total: handle.total(),
            provider,
            mode,
        }),
    ))
}

fn owned_run(state: &AppState, user: &CurrentUser, run_id: Uuid) -> Result<RunHandle, ApiError> {
    state
        .engine
        .runs()
        .get(run_id)
        .filter(|handle| handle.owner_id() == user.id)
        .ok_or_else(|| api_error(Error::NotFound(format!("Run {} not found", run_id))))
}

/// Latest progress of a run, with its report once finished
///
/// GET /api/v1/dispatch/:run_id
pub async fn get_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let handle = owned_run(&state, &user, run_id)?;
    Ok(Json(RunStatusResponse::from_handle(&handle)))
}

/// Cancel a run
///
/// POST /api/v1/dispatch/:run_id/cancel
pub async fn cancel_dispatch(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(run_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunStatusResponse>), ApiError> {
    let handle = owned_run(&state, &user, run_id)?;
    if handle.is_finished() {
        return Err(api_error(Error::Validation(format!(
            "Run {} has already finished",
            run_id
        ))));
    }

    handle.cancel();
    Ok((StatusCode::ACCEPTED, Json(RunStatusResponse::from_handle(&handle))))
}
