//! Action document endpoint

use axum::{body::Bytes, extract::State, Json};
use groundwork_common::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::document::ActionDocument;
use crate::envelope::ResponseEnvelope;
use crate::AppState;

/// POST /api/actions
///
/// Dispatches the posted action document and returns the response envelope.
pub async fn dispatch_actions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ResponseEnvelope>, ApiError> {
    if body.is_empty() {
        return Err(Error::InvalidInput("Request body is empty".to_string()).into());
    }

    let document = ActionDocument::from_slice(&body)?;
    debug!("Received action document with {} actions", document.actions.len());

    let envelope = state.dispatcher.dispatch(&document).await?;
    Ok(Json(envelope))
}
