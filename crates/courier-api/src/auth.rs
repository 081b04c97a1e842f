use std::sync::Arc;

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use axum::{
    Extension, Json, extract::State, extract::rejection::JsonRejection, http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use rand_core::OsRng;
use tracing::info;
use uuid::Uuid;

use courier_db::is_unique_violation;
use courier_types::api::{Claims, RegisterRequest, UpdateProfileRequest};

use crate::error::{ApiError, ApiResult};
use crate::middleware::IdentityProvider;
use crate::service::ConversationService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: ConversationService,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Create an account. Tokens are issued by the identity provider, not here.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;

    // Validate input
    let username = req.username.trim().to_string();
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::invalid("username must be 3 to 32 characters"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::invalid("password must be at least 8 characters"));
    }
    let display_name = req
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| username.clone());

    // Check if username is taken
    let db = state.service.db().clone();
    let lookup = username.clone();
    let existing = tokio::task::spawn_blocking(move || db.get_user_by_username(&lookup)).await??;
    if existing.is_some() {
        return Err(ApiError::conflict("username is taken"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let db = state.service.db().clone();
    let name = username.clone();
    let created = tokio::task::spawn_blocking(move || {
        db.create_user(user_id, &name, &display_name, &password_hash, Utc::now())
    })
    .await?;
    match created {
        Ok(()) => {}
        Err(e) if is_unique_violation(&e) => return Err(ApiError::conflict("username is taken")),
        Err(e) => return Err(e.into()),
    }

    info!("Registered {} ({})", username, user_id);
    let profile = state.service.profile(user_id).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.service.profile(claims.sub).await?))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = payload?;
    let profile = state
        .service
        .update_profile(claims.sub, req.display_name, req.avatar)
        .await?;
    Ok(Json(profile))
}
