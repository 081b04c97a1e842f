use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use courier_types::api::{
    ConversationStats, ConversationSummary, CreateConversationRequest, EditMessageRequest,
    ErrorBody, ErrorKind, ForwardMessageRequest, MarkSeenResponse, MessageResponse,
    PresenceResponse, ReactionRequest, RegisterRequest, SendMessageRequest, UpdateProfileRequest,
    UserProfile,
};
use courier_types::models::{Conversation, Message, PinnedMessage, Reaction};

use crate::error::ClientError;

/// REST client for one authenticated user.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    base_url: Url,
    token: String,
}

#[derive(serde::Deserialize)]
struct Removed {
    removed: bool,
}

impl ChatClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: Client::new(),
            base_url: parse_base(base_url)?,
            token: token.into(),
        })
    }

    /// Create an account. Needs no token.
    pub async fn register(base_url: &str, req: &RegisterRequest) -> Result<UserProfile, ClientError> {
        let url = join(&parse_base(base_url)?, &["auth", "register"])?;
        let response = Client::new().post(url).json(req).send().await?;
        decode(response).await
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// WebSocket URL of the gateway on the same host.
    pub fn gateway_url(&self) -> Result<Url, ClientError> {
        let mut url = join(&self.base_url, &["gateway"])?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Config(format!("cannot derive gateway url from {}", self.base_url)))?;
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ClientError> {
        let url = join(&self.base_url, segments)?;
        Ok(self.http.request(method, url).bearer_auth(&self.token))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let response = self.request(Method::GET, segments)?.send().await?;
        decode(response).await
    }

    async fn send_json<B, T>(&self, method: Method, segments: &[&str], body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(method, segments)?.json(body).send().await?;
        decode(response).await
    }

    async fn send_empty(&self, method: Method, segments: &[&str]) -> Result<(), ClientError> {
        let response = self.request(method, segments)?.send().await?;
        check(response).await.map(|_| ())
    }

    // -- Users --

    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        self.get(&["me"]).await
    }

    pub async fn update_profile(&self, req: &UpdateProfileRequest) -> Result<UserProfile, ClientError> {
        self.send_json(Method::PATCH, &["me"], req).await
    }

    // -- Conversations --

    pub async fn open_conversation(&self, user_id: Uuid) -> Result<Conversation, ClientError> {
        let req = CreateConversationRequest {
            user_id: Some(user_id),
        };
        self.send_json(Method::POST, &["conversations"], &req).await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.get(&["conversations"]).await
    }

    pub async fn messages(&self, conversation_id: Uuid) -> Result<Vec<MessageResponse>, ClientError> {
        self.get(&["conversations", &conversation_id.to_string(), "messages"])
            .await
    }

    pub async fn mark_seen(&self, conversation_id: Uuid) -> Result<usize, ClientError> {
        let response = self
            .request(Method::POST, &["conversations", &conversation_id.to_string(), "seen"])?
            .send()
            .await?;
        let body: MarkSeenResponse = decode(response).await?;
        Ok(body.marked)
    }

    pub async fn companion(&self, conversation_id: Uuid) -> Result<UserProfile, ClientError> {
        self.get(&["conversations", &conversation_id.to_string(), "companion"])
            .await
    }

    pub async fn stats(&self, conversation_id: Uuid) -> Result<ConversationStats, ClientError> {
        self.get(&["conversations", &conversation_id.to_string(), "stats"])
            .await
    }

    pub async fn pins(&self, conversation_id: Uuid) -> Result<Vec<PinnedMessage>, ClientError> {
        self.get(&["conversations", &conversation_id.to_string(), "pins"])
            .await
    }

    // -- Messages --

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: impl Into<String>,
        image: Option<String>,
    ) -> Result<Message, ClientError> {
        let req = SendMessageRequest {
            content: content.into(),
            image,
        };
        self.send_json(
            Method::POST,
            &["conversations", &conversation_id.to_string(), "messages"],
            &req,
        )
        .await
    }

    pub async fn edit_message(&self, message_id: Uuid, content: impl Into<String>) -> Result<Message, ClientError> {
        let req = EditMessageRequest {
            content: content.into(),
        };
        self.send_json(Method::PATCH, &["messages", &message_id.to_string()], &req)
            .await
    }

    pub async fn delete_message(&self, message_id: Uuid) -> Result<(), ClientError> {
        self.send_empty(Method::DELETE, &["messages", &message_id.to_string()])
            .await
    }

    pub async fn forward_message(&self, message_id: Uuid, target_conversation_id: Uuid) -> Result<Message, ClientError> {
        let req = ForwardMessageRequest {
            target_conversation_id: Some(target_conversation_id),
        };
        self.send_json(
            Method::POST,
            &["messages", &message_id.to_string(), "forward"],
            &req,
        )
        .await
    }

    pub async fn pin_message(&self, message_id: Uuid) -> Result<PinnedMessage, ClientError> {
        let response = self
            .request(Method::POST, &["messages", &message_id.to_string(), "pin"])?
            .send()
            .await?;
        decode(response).await
    }

    // -- Reactions --

    pub async fn react(&self, message_id: Uuid, emoji: &str) -> Result<Reaction, ClientError> {
        let req = ReactionRequest {
            emoji: emoji.to_string(),
        };
        self.send_json(
            Method::POST,
            &["messages", &message_id.to_string(), "reactions"],
            &req,
        )
        .await
    }

    /// Returns whether a reaction was actually removed.
    pub async fn unreact(&self, message_id: Uuid, emoji: &str) -> Result<bool, ClientError> {
        let response = self
            .request(
                Method::DELETE,
                &["messages", &message_id.to_string(), "reactions", emoji],
            )?
            .send()
            .await?;
        let body: Removed = decode(response).await?;
        Ok(body.removed)
    }

    // -- Presence --

    pub async fn online_users(&self) -> Result<Vec<Uuid>, ClientError> {
        let body: PresenceResponse = self.get(&["presence"]).await?;
        Ok(body.online)
    }

    pub async fn announce_presence(&self) -> Result<(), ClientError> {
        self.send_empty(Method::POST, &["presence"]).await
    }

    pub async fn withdraw_presence(&self) -> Result<(), ClientError> {
        self.send_empty(Method::DELETE, &["presence"]).await
    }
}

fn parse_base(base_url: &str) -> Result<Url, ClientError> {
    Url::parse(base_url).map_err(|e| ClientError::Config(format!("invalid base url '{}': {}", base_url, e)))
}

/// Append path segments, percent-encoding each one.
fn join(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::Config(format!("{} cannot be a base url", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let error = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Api {
            kind: body.kind,
            message: body.message,
        },
        Err(_) => ClientError::Api {
            kind: ErrorKind::from_status(status.as_u16()),
            message: text,
        },
    };
    Err(error)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    Ok(check(response).await?.json().await?)
}
