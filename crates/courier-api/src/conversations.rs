use axum::{
    Extension, Json,
    extract::rejection::{JsonRejection, PathRejection},
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::{Claims, CreateConversationRequest, MarkSeenResponse};

use crate::auth::AppState;
use crate::error::ApiResult;

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.list_conversations(claims.sub).await?))
}

/// 201 when the conversation was created, 200 when it already existed.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let (conversation, created) = state
        .service
        .create_or_get_conversation(claims.sub, req.user_id)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(conversation)))
}

pub async fn mark_seen(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(conversation_id) = path?;
    let marked = state.service.mark_seen(claims.sub, conversation_id).await?;
    Ok(Json(MarkSeenResponse { marked }))
}

pub async fn companion(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(conversation_id) = path?;
    Ok(Json(state.service.companion(claims.sub, conversation_id).await?))
}

pub async fn stats(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    let Path(conversation_id) = path?;
    Ok(Json(state.service.stats(claims.sub, conversation_id).await?))
}
