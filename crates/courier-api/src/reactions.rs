use axum::{
    Extension, Json,
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::{Claims, ReactionRequest};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn add_reaction(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ReactionRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(message_id) = path?;
    let Json(req) = payload?;
    let reaction = state.service.react(claims.sub, message_id, &req.emoji).await?;
    Ok((StatusCode::CREATED, Json(reaction)))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    path: Result<Path<(Uuid, String)>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path((message_id, emoji)) = path?;
    let removed = state.service.unreact(claims.sub, message_id, &emoji).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}
