pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use courier_api::auth::{AppState, AppStateInner};
use courier_api::error::ApiError;
use courier_api::middleware::{IdentityProvider, bearer_token};
use courier_api::service::ConversationService;
use courier_db::Database;
use courier_gateway::connection::{self, GatewayContext};
use courier_gateway::dispatcher::Dispatcher;
use courier_gateway::presence::PresenceTracker;

/// Process-wide shared state. The REST service and the gateway publish
/// through the same dispatcher and track the same presence.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub presence: PresenceTracker,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Services {
    pub fn new(db: Arc<Database>, identity: Arc<dyn IdentityProvider>, presence_ttl: Duration) -> Self {
        Self {
            db,
            dispatcher: Dispatcher::new(),
            presence: PresenceTracker::new(presence_ttl),
            identity,
        }
    }
}

#[derive(Clone)]
struct GatewayState {
    ctx: GatewayContext,
    identity: Arc<dyn IdentityProvider>,
}

#[derive(Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// The full HTTP surface: REST routes plus the `/gateway` socket.
pub fn app(services: &Services) -> Router {
    let service = ConversationService::new(
        services.db.clone(),
        Arc::new(services.dispatcher.clone()),
        services.presence.clone(),
    );
    let app_state: AppState = Arc::new(AppStateInner {
        service,
        identity: services.identity.clone(),
    });

    let gateway = GatewayState {
        ctx: GatewayContext {
            dispatcher: services.dispatcher.clone(),
            presence: services.presence.clone(),
            db: services.db.clone(),
        },
        identity: services.identity.clone(),
    };
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    Router::new()
        .merge(courier_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Authenticate before upgrading. Browsers cannot set headers on a
/// WebSocket, so `?token=` is accepted as well.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .or(query.token)
        .ok_or(ApiError::Unauthorized)?;
    let claims = state
        .identity
        .verify(&token)
        .ok_or(ApiError::Unauthorized)?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection_authenticated(socket, state.ctx, claims.sub, claims.username)
    }))
}
