use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use courier_db::Database;
use courier_types::events::{ClientCommand, Envelope, RelayEvent, ServerFrame, Topic};

use crate::dispatcher::Dispatcher;
use crate::presence::{self, PresenceTracker};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a gateway connection needs from the server.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub presence: PresenceTracker,
    pub db: Arc<Database>,
}

/// Handle a WebSocket connection whose identity was verified at the HTTP
/// upgrade layer.
///
/// The connection starts subscribed to the user's personal topic and the
/// presence topic. Conversation topics are added with `subscribe` commands
/// and only granted to participants.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    ctx: GatewayContext,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, receiver) = socket.split();

    let (conn_id, delivery_rx) = ctx.dispatcher.connect().await;
    ctx.dispatcher.subscribe(conn_id, Topic::User(user_id)).await;
    ctx.dispatcher.subscribe(conn_id, Topic::Presence).await;

    info!("{} ({}) connected to gateway as {}", username, user_id, conn_id);

    let ready = ServerFrame::Ready {
        user_id,
        connection_id: conn_id,
    };
    if !send_frame(&mut sender, &ready).await {
        ctx.dispatcher.disconnect(conn_id).await;
        return;
    }

    // Send existing online users to this client so they see who's already here
    for uid in ctx.presence.online_users().await {
        let frame = ServerFrame::Event(Envelope {
            topic: Topic::Presence,
            event: RelayEvent::UserOnline { user_id: uid },
        });
        if !send_frame(&mut sender, &frame).await {
            ctx.dispatcher.disconnect(conn_id).await;
            return;
        }
    }

    // Now mark ourselves online (broadcasts to everyone else)
    presence::announce_online(&ctx.presence, &ctx.dispatcher, user_id, conn_id).await;

    run_connection_loop(sender, receiver, delivery_rx, &ctx, user_id, &username, conn_id).await;

    ctx.dispatcher.disconnect(conn_id).await;
    presence::announce_offline(&ctx.presence, &ctx.dispatcher, user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut delivery_rx: mpsc::UnboundedReceiver<Arc<crate::dispatcher::Delivery>>,
    ctx: &GatewayContext,
    user_id: Uuid,
    username: &str,
    conn_id: Uuid,
) {
    // Replies to commands travel from the recv task to the send task
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward deliveries + command replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                delivery = delivery_rx.recv() => {
                    let Some(delivery) = delivery else { break };
                    if sender.send(Message::Text(delivery.frame.clone().into())).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(frame) = reply else { break };
                    if !send_frame(&mut sender, &frame).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_ctx = ctx.clone();
    let username_recv = username.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        let reply = handle_command(&recv_ctx, user_id, conn_id, cmd).await;
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                    presence::announce_online(
                        &recv_ctx.presence,
                        &recv_ctx.dispatcher,
                        user_id,
                        conn_id,
                    )
                    .await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_command(
    ctx: &GatewayContext,
    user_id: Uuid,
    conn_id: Uuid,
    cmd: ClientCommand,
) -> ServerFrame {
    match cmd {
        ClientCommand::Subscribe { topic } => match authorize(ctx, user_id, topic).await {
            Ok(()) => {
                ctx.dispatcher.subscribe(conn_id, topic).await;
                info!("{} subscribed to {}", user_id, topic);
                ServerFrame::Subscribed { topic }
            }
            Err(reason) => {
                warn!("{} denied subscription to {}: {}", user_id, topic, reason);
                ServerFrame::Rejected {
                    topic,
                    reason: reason.to_string(),
                }
            }
        },

        ClientCommand::Unsubscribe { topic } => {
            ctx.dispatcher.unsubscribe(conn_id, topic).await;
            ServerFrame::Unsubscribed { topic }
        }
    }
}

/// Personal topics are private to their owner; conversation topics are
/// restricted to participants; presence is open to everyone.
async fn authorize(ctx: &GatewayContext, user_id: Uuid, topic: Topic) -> Result<(), &'static str> {
    match topic {
        Topic::Presence => Ok(()),
        Topic::User(owner) if owner == user_id => Ok(()),
        Topic::User(_) => Err("personal topics are private"),
        Topic::Conversation(conversation_id) => {
            let db = ctx.db.clone();
            let member =
                tokio::task::spawn_blocking(move || db.is_participant(conversation_id, user_id))
                    .await;
            match member {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => Err("not a participant"),
                Ok(Err(e)) => {
                    warn!("Membership lookup failed: {}", e);
                    Err("membership lookup failed")
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                    Err("membership lookup failed")
                }
            }
        }
    }
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway frame: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}
