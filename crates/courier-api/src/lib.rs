pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod pins;
pub mod presence;
pub mod reactions;
pub mod service;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post},
};

use crate::auth::AppState;

/// Every REST route. `/auth/register` is public, the rest require a bearer
/// token.
pub fn routes(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/me", get(auth::me).patch(auth::update_me))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/seen", post(conversations::mark_seen))
        .route(
            "/conversations/{conversation_id}/companion",
            get(conversations::companion),
        )
        .route("/conversations/{conversation_id}/stats", get(conversations::stats))
        .route("/conversations/{conversation_id}/pins", get(pins::list_pins))
        .route(
            "/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/messages/{message_id}/forward", post(messages::forward_message))
        .route("/messages/{message_id}/pin", post(pins::pin_message))
        .route("/messages/{message_id}/reactions", post(reactions::add_reaction))
        .route(
            "/messages/{message_id}/reactions/{emoji}",
            delete(reactions::remove_reaction),
        )
        .route(
            "/presence",
            get(presence::list_online)
                .post(presence::announce)
                .delete(presence::withdraw),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().merge(public).merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        response::Response,
    };
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use courier_db::Database;
    use courier_gateway::dispatcher::Dispatcher;
    use courier_gateway::presence::PresenceTracker;
    use courier_types::api::Claims;

    use crate::auth::AppStateInner;
    use crate::middleware::JwtIdentity;
    use crate::service::ConversationService;

    const SECRET: &str = "router-test-secret";

    fn app() -> Router {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = ConversationService::new(
            db,
            Arc::new(Dispatcher::new()),
            PresenceTracker::new(Duration::from_secs(60)),
        );
        routes(Arc::new(AppStateInner {
            service,
            identity: Arc::new(JwtIdentity::new(SECRET)),
        }))
    }

    fn token_for(user_id: Uuid, username: &str) -> String {
        let claims = Claims {
            sub: user_id,
            username: username.into(),
            exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Register a user and return (id, token).
    async fn register(app: &Router, username: &str) -> (Uuid, String) {
        let response = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": username, "password": "correct horse" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        (id, token_for(id, username))
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let app = app();

        let response = call(&app, "GET", "/conversations", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["kind"], "unauthorized");

        let response = call(&app, "GET", "/conversations", Some("garbage"), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn registration_validates_and_rejects_duplicates() {
        let app = app();
        register(&app, "alice").await;

        let response = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "another pass" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "zed", "password": "short" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "invalid-argument");
    }

    #[tokio::test]
    async fn conversation_flow_over_http() {
        let app = app();
        let (alice, alice_token) = register(&app, "alice").await;
        let (bob, bob_token) = register(&app, "bob").await;
        let (_, carol_token) = register(&app, "carol").await;

        let response = call(
            &app,
            "POST",
            "/conversations",
            Some(&alice_token),
            Some(json!({ "userId": bob })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let conversation_id = json_body(response).await["id"].as_str().unwrap().to_string();

        // Opening it again from the other side returns the same conversation
        let response = call(
            &app,
            "POST",
            "/conversations",
            Some(&bob_token),
            Some(json!({ "userId": alice })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["id"], conversation_id.as_str());

        let messages_uri = format!("/conversations/{}/messages", conversation_id);
        let response = call(
            &app,
            "POST",
            &messages_uri,
            Some(&alice_token),
            Some(json!({ "content": "hello" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let message = json_body(response).await;
        assert_eq!(message["senderId"], alice.to_string());
        assert_eq!(message["edited"], false);

        let response = call(&app, "GET", "/conversations", Some(&bob_token), None).await;
        let listed = json_body(response).await;
        assert_eq!(listed[0]["unreadCount"], 1);
        assert_eq!(listed[0]["companion"]["username"], "alice");

        let response = call(&app, "GET", &messages_uri, Some(&carol_token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["kind"], "forbidden");

        let message_id = message["id"].as_str().unwrap();
        let response = call(
            &app,
            "POST",
            &format!("/messages/{}/reactions", message_id),
            Some(&bob_token),
            Some(json!({ "emoji": "👍" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = call(&app, "GET", &messages_uri, Some(&bob_token), None).await;
        let snapshot = json_body(response).await;
        assert_eq!(snapshot[0]["content"], "hello");
        assert_eq!(snapshot[0]["reactions"][0]["count"], 1);

        // Percent-encoded emoji in the path
        let response = call(
            &app,
            "DELETE",
            &format!("/messages/{}/reactions/%F0%9F%91%8D", message_id),
            Some(&bob_token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["removed"], true);

        let response = call(
            &app,
            "DELETE",
            &format!("/messages/{}", message_id),
            Some(&bob_token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = call(
            &app,
            "DELETE",
            &format!("/messages/{}", message_id),
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn malformed_input_is_an_invalid_argument() {
        let app = app();
        let (_, token) = register(&app, "alice").await;

        let response = call(&app, "GET", "/conversations/not-a-uuid/messages", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["kind"], "invalid-argument");

        let response = call(
            &app,
            "POST",
            "/conversations",
            Some(&token),
            Some(json!({ "userId": "nope", "extra": 1 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn http_presence_round_trip() {
        let app = app();
        let (alice, token) = register(&app, "alice").await;

        let response = call(&app, "POST", "/presence", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let online = json_body(call(&app, "GET", "/presence", Some(&token), None).await).await;
        assert_eq!(online["online"][0], alice.to_string());

        let me = json_body(call(&app, "GET", "/me", Some(&token), None).await).await;
        assert_eq!(me["online"], true);

        call(&app, "DELETE", "/presence", Some(&token), None).await;
        let online = json_body(call(&app, "GET", "/presence", Some(&token), None).await).await;
        assert!(online["online"].as_array().unwrap().is_empty());
    }
}
