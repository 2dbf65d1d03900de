//! Schedule handlers - Deferred dispatches picked up by the schedule worker

use axum::{extract::State, http::StatusCode, Extension, Json};
use chrono::{DateTime, Utc};
use mailblast_common::types::CurrentUser;
use mailblast_common::Error;
use mailblast_core::RecipientSelection;
use mailblast_storage::{NewSchedule, Schedule};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{api_error, ApiError};

/// Request body for scheduling a run
#[derive(Debug, Clone, Deserialize)]
pub struct CreateScheduleRequest {
    pub template_id: Uuid,
    #[serde(default)]
    pub contact_ids: Vec<Uuid>,
    pub tag: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

/// Schedule a run
///
/// POST /api/v1/schedules
pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Schedule>), ApiError> {
    if input.scheduled_at <= Utc::now() {
        return Err(api_error(Error::Validation(
            "scheduled_at must be in the future".to_string(),
        )));
    }

    let selection = RecipientSelection::from_parts(input.contact_ids, input.tag).map_err(api_error)?;
    // Fail now rather than at run time for a template that does not exist
    state
        .inputs
        .template(user.id, input.template_id)
        .await
        .map_err(api_error)?;

    let (contact_ids, tag) = match selection {
        RecipientSelection::Ids(ids) => (ids, None),
        RecipientSelection::Tag(tag) => (Vec::new(), Some(tag)),
    };

    let schedule = state
        .schedules
        .create(NewSchedule {
            user_id: user.id,
            template_id: input.template_id,
            contact_ids,
            tag,
            scheduled_at: input.scheduled_at,
        })
        .await
        .map_err(api_error)?;

    info!(
        user_id = %user.id,
        schedule_id = %schedule.id,
        scheduled_at = %schedule.scheduled_at,
        "Dispatch scheduled"
    );

    Ok((StatusCode::CREATED, Json(schedule)))
}
