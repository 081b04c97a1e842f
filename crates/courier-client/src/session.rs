//! A live gateway session.
//!
//! One background task owns the socket. Entering a conversation subscribes
//! to its topic and, once the server confirms, loads the snapshot into a
//! [`ConversationView`]. Frames that arrive while the snapshot is loading
//! wait in the socket and are applied afterwards; the view ignores the ones
//! the snapshot already covers. When the socket drops, the task reconnects
//! with backoff, subscribes again and reloads every open conversation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::events::{ClientCommand, Envelope, RelayEvent, ServerFrame, Topic};
use courier_types::models::{Message, PinnedMessage, Reaction};

use crate::backoff::Backoff;
use crate::client::ChatClient;
use crate::error::ClientError;
use crate::inbox::Inbox;
use crate::roster::Roster;
use crate::view::ConversationView;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = SplitSink<Socket, WsMessage>;
type EnterReply = oneshot::Sender<Result<(), ClientError>>;

const UPDATE_CAPACITY: usize = 256;

/// What the session observed, for callers that want to react to changes.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Connected { connection_id: Uuid },
    Disconnected,
    /// A conversation view was (re)loaded from the server.
    Synced(Uuid),
    Event(Envelope),
    Rejected { topic: Topic, reason: String },
}

enum Command {
    Enter {
        conversation_id: Uuid,
        reply: EnterReply,
    },
    Leave {
        conversation_id: Uuid,
    },
}

struct SessionState {
    views: HashMap<Uuid, ConversationView>,
    inbox: Inbox,
    roster: Roster,
}

pub struct ClientSession {
    client: ChatClient,
    user_id: Uuid,
    state: Arc<RwLock<SessionState>>,
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<SessionUpdate>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ClientSession {
    pub async fn connect(client: ChatClient) -> Result<Self, ClientError> {
        Self::connect_with_backoff(client, Backoff::default()).await
    }

    /// Connect once, failing fast. Later reconnects use `backoff`.
    pub async fn connect_with_backoff(client: ChatClient, backoff: Backoff) -> Result<Self, ClientError> {
        let me = client.me().await?;
        let socket = open_socket(&client).await?;

        let state = Arc::new(RwLock::new(SessionState {
            views: HashMap::new(),
            inbox: Inbox::new(me.user.id),
            roster: Roster::default(),
        }));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let cancel = CancellationToken::new();

        let driver = Driver {
            client: client.clone(),
            state: state.clone(),
            updates: updates.clone(),
            cancel: cancel.clone(),
            backoff,
            entered: HashSet::new(),
            waiting: HashMap::new(),
        };
        let task = tokio::spawn(driver.run(socket, command_rx));

        info!("Session started for {}", me.user.username);
        Ok(Self {
            client,
            user_id: me.user.id,
            state,
            commands,
            updates,
            cancel,
            task,
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    pub fn updates(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Open a conversation: subscribe, load the snapshot, keep it live.
    /// Resolves once the view is loaded.
    pub async fn enter(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Enter {
                conversation_id,
                reply,
            })
            .map_err(|_| ClientError::Closed)?;
        done.await.map_err(|_| ClientError::Closed)?
    }

    pub fn leave(&self, conversation_id: Uuid) -> Result<(), ClientError> {
        self.commands
            .send(Command::Leave { conversation_id })
            .map_err(|_| ClientError::Closed)
    }

    pub async fn view(&self, conversation_id: Uuid) -> Option<ConversationView> {
        self.state.read().await.views.get(&conversation_id).cloned()
    }

    pub async fn unread_count(&self, conversation_id: Uuid) -> u32 {
        self.state.read().await.inbox.unread_count(conversation_id)
    }

    pub async fn unread_conversations(&self) -> Vec<Uuid> {
        self.state.read().await.inbox.unread_conversations()
    }

    pub async fn online(&self) -> Vec<Uuid> {
        self.state.read().await.roster.online()
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state.read().await.roster.is_online(user_id)
    }

    /// Mark a conversation seen on the server, then clear its badge.
    pub async fn mark_read(&self, conversation_id: Uuid) -> Result<usize, ClientError> {
        let marked = self.client.mark_seen(conversation_id).await?;
        self.state.write().await.inbox.mark_read(conversation_id);
        Ok(marked)
    }

    // Writes go to the server first; the local view changes only on success.

    pub async fn send_message(&self, conversation_id: Uuid, content: &str) -> Result<Message, ClientError> {
        let message = self.client.send_message(conversation_id, content, None).await?;
        self.apply_local(RelayEvent::MessageCreated(message.clone())).await;
        Ok(message)
    }

    pub async fn edit_message(&self, message_id: Uuid, content: &str) -> Result<Message, ClientError> {
        let message = self.client.edit_message(message_id, content).await?;
        self.apply_local(RelayEvent::MessageUpdated {
            id: message.id,
            conversation_id: message.conversation_id,
            content: message.content.clone(),
            edited: message.edited,
        })
        .await;
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: Uuid) -> Result<(), ClientError> {
        self.client.delete_message(message_id).await?;
        if let Some(conversation_id) = self.conversation_of(message_id).await {
            self.apply_local(RelayEvent::MessageDeleted {
                id: message_id,
                conversation_id,
            })
            .await;
        }
        Ok(())
    }

    pub async fn forward_message(&self, message_id: Uuid, target_conversation_id: Uuid) -> Result<Message, ClientError> {
        let copy = self
            .client
            .forward_message(message_id, target_conversation_id)
            .await?;
        self.apply_local(RelayEvent::MessageCreated(copy.clone())).await;
        Ok(copy)
    }

    pub async fn react(&self, message_id: Uuid, emoji: &str) -> Result<Reaction, ClientError> {
        let reaction = self.client.react(message_id, emoji).await?;
        if let Some(conversation_id) = self.conversation_of(message_id).await {
            self.apply_local(RelayEvent::ReactionAdded {
                message_id,
                conversation_id,
                emoji: reaction.emoji.clone(),
                user_id: reaction.user_id,
            })
            .await;
        }
        Ok(reaction)
    }

    pub async fn unreact(&self, message_id: Uuid, emoji: &str) -> Result<bool, ClientError> {
        let removed = self.client.unreact(message_id, emoji).await?;
        if let Some(conversation_id) = self.conversation_of(message_id).await {
            self.apply_local(RelayEvent::ReactionRemoved {
                message_id,
                conversation_id,
                emoji: emoji.trim().to_string(),
                user_id: self.user_id,
            })
            .await;
        }
        Ok(removed)
    }

    pub async fn pin_message(&self, message_id: Uuid) -> Result<PinnedMessage, ClientError> {
        let pinned = self.client.pin_message(message_id).await?;
        self.apply_local(RelayEvent::MessagePinned {
            pinned_message: pinned.clone(),
            conversation_id: pinned.conversation_id,
        })
        .await;
        Ok(pinned)
    }

    /// Stop the background task and close the socket.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Session task ended abnormally: {}", e);
        }
    }

    async fn conversation_of(&self, message_id: Uuid) -> Option<Uuid> {
        let state = self.state.read().await;
        state
            .views
            .values()
            .find(|view| view.contains(message_id))
            .map(ConversationView::conversation_id)
    }

    async fn apply_local(&self, event: RelayEvent) {
        let Some(conversation_id) = event.conversation_id() else {
            return;
        };
        let mut state = self.state.write().await;
        if let Some(view) = state.views.get_mut(&conversation_id) {
            view.apply(&event);
        }
    }
}

enum Outcome {
    /// The socket went away; try again.
    Lost,
    /// The session was closed or dropped.
    Closed,
}

struct Driver {
    client: ChatClient,
    state: Arc<RwLock<SessionState>>,
    updates: broadcast::Sender<SessionUpdate>,
    cancel: CancellationToken,
    backoff: Backoff,
    /// Conversations that stay subscribed across reconnects.
    entered: HashSet<Uuid>,
    /// `enter` calls waiting for their first snapshot.
    waiting: HashMap<Uuid, Vec<EnterReply>>,
}

impl Driver {
    async fn run(mut self, mut socket: Socket, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            if let Outcome::Closed = self.drive(socket, &mut commands).await {
                break;
            }

            let _ = self.updates.send(SessionUpdate::Disconnected);
            socket = match self.reconnect().await {
                Some(socket) => socket,
                None => break,
            };
        }

        for (_, replies) in self.waiting.drain() {
            for reply in replies {
                let _ = reply.send(Err(ClientError::Closed));
            }
        }
        debug!("Session task finished");
    }

    async fn drive(&mut self, socket: Socket, commands: &mut mpsc::UnboundedReceiver<Command>) -> Outcome {
        let (mut sink, mut stream) = socket.split();

        // Restore conversation subscriptions after a reconnect
        let entered: Vec<Uuid> = self.entered.iter().copied().collect();
        for conversation_id in entered {
            let command = ClientCommand::Subscribe {
                topic: Topic::Conversation(conversation_id),
            };
            if let Err(e) = send_command(&mut sink, &command).await {
                warn!("Resubscribe to {} failed: {}", conversation_id, e);
                return Outcome::Lost;
            }
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Outcome::Closed;
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return Outcome::Closed;
                    };
                    if let Err(e) = self.handle_command(&mut sink, command).await {
                        warn!("Gateway command failed: {}", e);
                        return Outcome::Lost;
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => self.handle_frame(frame).await,
                        Err(e) => warn!("Undecodable gateway frame: {}", e),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Gateway closed the connection");
                        return Outcome::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Gateway socket error: {}", e);
                        return Outcome::Lost;
                    }
                },
            }
        }
    }

    async fn handle_command(&mut self, sink: &mut Sink, command: Command) -> Result<(), ClientError> {
        match command {
            Command::Enter {
                conversation_id,
                reply,
            } => {
                self.entered.insert(conversation_id);
                self.waiting.entry(conversation_id).or_default().push(reply);
                {
                    let mut state = self.state.write().await;
                    state
                        .views
                        .entry(conversation_id)
                        .or_insert_with(|| ConversationView::new(conversation_id));
                    state.inbox.set_active(Some(conversation_id));
                }
                let topic = Topic::Conversation(conversation_id);
                send_command(sink, &ClientCommand::Subscribe { topic }).await
            }

            Command::Leave { conversation_id } => {
                self.entered.remove(&conversation_id);
                {
                    let mut state = self.state.write().await;
                    state.views.remove(&conversation_id);
                    if state.inbox.active() == Some(conversation_id) {
                        state.inbox.set_active(None);
                    }
                }
                let topic = Topic::Conversation(conversation_id);
                send_command(sink, &ClientCommand::Unsubscribe { topic }).await
            }
        }
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ready { connection_id, .. } => {
                info!("Gateway ready as {}", connection_id);
                self.refresh_directory().await;
                let _ = self.updates.send(SessionUpdate::Connected { connection_id });
            }

            ServerFrame::Event(envelope) => {
                {
                    let mut state = self.state.write().await;
                    match envelope.topic {
                        Topic::Conversation(id) => {
                            if let Some(view) = state.views.get_mut(&id) {
                                view.apply(&envelope.event);
                            }
                        }
                        Topic::User(_) => {
                            state.inbox.apply(&envelope.event);
                        }
                        Topic::Presence => {
                            state.roster.apply(&envelope.event);
                        }
                    }
                }
                let _ = self.updates.send(SessionUpdate::Event(envelope));
            }

            ServerFrame::Subscribed { topic } => {
                if let Topic::Conversation(id) = topic {
                    if self.entered.contains(&id) {
                        self.sync(id).await;
                    }
                }
            }

            ServerFrame::Unsubscribed { topic } => debug!("Unsubscribed from {}", topic),

            ServerFrame::Rejected { topic, reason } => {
                warn!("Subscription to {} rejected: {}", topic, reason);
                if let Topic::Conversation(id) = topic {
                    self.entered.remove(&id);
                    self.state.write().await.views.remove(&id);
                    for reply in self.waiting.remove(&id).unwrap_or_default() {
                        let _ = reply.send(Err(ClientError::Rejected {
                            topic,
                            reason: reason.clone(),
                        }));
                    }
                }
                let _ = self.updates.send(SessionUpdate::Rejected { topic, reason });
            }
        }
    }

    /// Load the authoritative message list and pins for an entered
    /// conversation.
    async fn sync(&mut self, conversation_id: Uuid) {
        let loaded = async {
            let messages = self.client.messages(conversation_id).await?;
            let pins = self.client.pins(conversation_id).await?;
            Ok::<_, ClientError>((messages, pins))
        }
        .await;

        let replies = self.waiting.remove(&conversation_id).unwrap_or_default();
        match loaded {
            Ok((messages, pins)) => {
                {
                    let mut state = self.state.write().await;
                    if let Some(view) = state.views.get_mut(&conversation_id) {
                        view.reset(messages);
                        view.set_pins(pins);
                    }
                }
                debug!("Synced conversation {}", conversation_id);
                for reply in replies {
                    let _ = reply.send(Ok(()));
                }
                let _ = self.updates.send(SessionUpdate::Synced(conversation_id));
            }
            Err(e) => {
                warn!("Snapshot of {} failed: {}", conversation_id, e);
                let source = Arc::new(e);
                for reply in replies {
                    let _ = reply.send(Err(ClientError::Snapshot {
                        conversation_id,
                        source: source.clone(),
                    }));
                }
            }
        }
    }

    /// Unread counts and the online set, fetched on every (re)connect.
    async fn refresh_directory(&mut self) {
        match self.client.conversations().await {
            Ok(summaries) => self.state.write().await.inbox.seed(&summaries),
            Err(e) => warn!("Failed to load conversations: {}", e),
        }
        match self.client.online_users().await {
            Ok(online) => self.state.write().await.roster.reset(online),
            Err(e) => warn!("Failed to load presence: {}", e),
        }
    }

    async fn reconnect(&mut self) -> Option<Socket> {
        loop {
            let delay = self.backoff.next_delay();
            debug!("Reconnecting in {:?} (attempt {})", delay, self.backoff.attempt());
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match open_socket(&self.client).await {
                Ok(socket) => {
                    info!("Gateway reconnected");
                    self.backoff.reset();
                    return Some(socket);
                }
                Err(e) => warn!("Reconnect failed: {}", e),
            }
        }
    }
}

async fn open_socket(client: &ChatClient) -> Result<Socket, ClientError> {
    let mut request = client.gateway_url()?.as_str().into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", client.token()))
        .map_err(|e| ClientError::Config(format!("token is not a valid header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (socket, _) = connect_async(request).await?;
    Ok(socket)
}

async fn send_command(sink: &mut Sink, command: &ClientCommand) -> Result<(), ClientError> {
    let text = serde_json::to_string(command)?;
    sink.send(WsMessage::Text(text.into())).await?;
    Ok(())
}
