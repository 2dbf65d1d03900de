//! Preview handler - Renders a template the way a recipient would see it

use axum::{extract::State, Extension, Json};
use chrono::Local;
use mailblast_common::types::{CurrentUser, Recipient};
use mailblast_core::RenderedMessage;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AppState;
use crate::error::{api_error, ApiError};

/// Request body for a preview
#[derive(Debug, Clone, Deserialize)]
pub struct PreviewRequest {
    pub template_id: Uuid,
    /// Render for this contact; sample data otherwise
    pub contact_id: Option<Uuid>,
}

/// Stand-in recipient used when no contact is chosen
pub fn sample_recipient() -> Recipient {
    let mut recipient = Recipient::new(Uuid::nil(), "Maria Silva", "maria.silva@exemplo.com.br");
    recipient.phone = Some("(11) 98765-4321".to_string());
    recipient.legal_name = Some("Silva Comércio LTDA".to_string());
    recipient
}

/// Render a preview
///
/// POST /api/v1/preview
pub async fn preview(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(input): Json<PreviewRequest>,
) -> Result<Json<RenderedMessage>, ApiError> {
    let template = state
        .inputs
        .template(user.id, input.template_id)
        .await
        .map_err(api_error)?;

    let recipient = match input.contact_id {
        Some(id) => state.inputs.recipient(user.id, id).await.map_err(api_error)?,
        None => sample_recipient(),
    };

    Ok(Json(state.renderer.render_preview(
        &template,
        &recipient,
        Local::now().naive_local(),
    )))
}
