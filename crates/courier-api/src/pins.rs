use axum::{
    Extension, Json,
    extract::rejection::PathRejection,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn pin_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(message_id) = path?;
    let pinned = state.service.pin_message(claims.sub, message_id).await?;
    Ok((StatusCode::CREATED, Json(pinned)))
}

pub async fn list_pins(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(conversation_id) = path?;
    Ok(Json(state.service.list_pins(claims.sub, conversation_id).await?))
}
