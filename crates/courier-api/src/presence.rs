use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use courier_gateway::presence::{self, ANNOUNCE_CONNECTION};
use courier_types::api::{Claims, PresenceResponse};

use crate::auth::AppState;

pub async fn list_online(State(state): State<AppState>) -> impl IntoResponse {
    let mut online = state.service.presence().online_users().await;
    online.sort();
    Json(PresenceResponse { online })
}

/// Mark the caller online. Clients without a gateway socket repeat this
/// within the presence TTL to stay online.
pub async fn announce(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let service = &state.service;
    presence::announce_online(
        service.presence(),
        service.relay(),
        claims.sub,
        ANNOUNCE_CONNECTION,
    )
    .await;
    StatusCode::NO_CONTENT
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let service = &state.service;
    presence::announce_offline(
        service.presence(),
        service.relay(),
        claims.sub,
        ANNOUNCE_CONNECTION,
    )
    .await;
    StatusCode::NO_CONTENT
}
