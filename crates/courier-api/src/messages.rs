use axum::{
    Extension, Json,
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::{Claims, EditMessageRequest, ForwardMessageRequest, SendMessageRequest};

use crate::auth::AppState;
use crate::error::ApiResult;

/// Ascending snapshot of a conversation. Clients subscribe to the
/// conversation topic before calling this and merge live events on top.
pub async fn get_messages(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(conversation_id) = path?;
    Ok(Json(state.service.messages(claims.sub, conversation_id).await?))
}

pub async fn send_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(conversation_id) = path?;
    let Json(req) = payload?;
    let message = state
        .service
        .send_message(claims.sub, conversation_id, req.content, req.image)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<EditMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(message_id) = path?;
    let Json(req) = payload?;
    let message = state
        .service
        .edit_message(claims.sub, message_id, req.content)
        .await?;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(message_id) = path?;
    state.service.delete_message(claims.sub, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn forward_message(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ForwardMessageRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(message_id) = path?;
    let Json(req) = payload?;
    let copy = state
        .service
        .forward_message(claims.sub, message_id, req.target_conversation_id)
        .await?;
    Ok((StatusCode::CREATED, Json(copy)))
}
