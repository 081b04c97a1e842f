use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jsonwebtoken::{EncodingKey, Header, encode};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use courier_api::middleware::JwtIdentity;
use courier_client::backoff::Backoff;
use courier_client::{ChatClient, ClientError, ClientSession, SessionUpdate};
use courier_db::Database;
use courier_server::{Services, app};
use courier_types::api::{Claims, ErrorKind, RegisterRequest};

const SECRET: &str = "end-to-end-secret";

async fn start_server() -> String {
    format!("http://{}", serve().await)
}

async fn serve() -> SocketAddr {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let services = Services::new(db, Arc::new(JwtIdentity::new(SECRET)), Duration::from_secs(60));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(&services)).await.unwrap();
    });
    addr
}

/// TCP forwarder in front of the server whose links can be cut.
struct Relay {
    addr: SocketAddr,
    open: Arc<AtomicBool>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Relay {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let open = Arc::new(AtomicBool::new(true));
        let links: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();

        let (accepting, tracked) = (open.clone(), links.clone());
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                // Dropping the stream refuses the connection
                if !accepting.load(Ordering::SeqCst) {
                    continue;
                }
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                tracked.lock().unwrap().push(link);
            }
        });

        Self { addr, open, links }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Drop every live link and refuse new ones.
    fn cut(&self) {
        self.open.store(false, Ordering::SeqCst);
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }

    fn restore(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

async fn wait_for_update(updates: &mut broadcast::Receiver<SessionUpdate>, wanted: SessionUpdate) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match updates.recv().await {
                Ok(update) if update == wanted => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("session ended"),
            }
        }
    })
    .await;
    assert!(found.is_ok(), "timed out waiting for {:?}", wanted);
}

async fn sign_up(base_url: &str, username: &str) -> (Uuid, ChatClient) {
    let req = RegisterRequest {
        username: username.into(),
        password: "correct horse battery".into(),
        display_name: None,
    };
    let profile = ChatClient::register(base_url, &req).await.unwrap();

    let claims = Claims {
        sub: profile.user.id,
        username: username.into(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    (profile.user.id, ChatClient::new(base_url, token).unwrap())
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn hello_reaches_the_other_side() {
    let base_url = start_server().await;
    let (_, alice) = sign_up(&base_url, "alice").await;
    let (bob_id, bob) = sign_up(&base_url, "bob").await;

    let bob_session = ClientSession::connect(bob.clone()).await.unwrap();
    // Bob sees himself online once the gateway has subscribed him
    eventually("bob online", || bob_session.is_online(bob_id)).await;

    let conversation = alice.open_conversation(bob_id).await.unwrap();
    let hello = alice
        .send_message(conversation.id, "hello", None)
        .await
        .unwrap();

    eventually("unread badge", || async {
        bob_session.unread_count(conversation.id).await == 1
    })
    .await;

    bob_session.enter(conversation.id).await.unwrap();
    assert_eq!(bob_session.unread_count(conversation.id).await, 0);
    let view = bob_session.view(conversation.id).await.unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view.get(hello.id).unwrap().message.content, "hello");

    assert_eq!(bob_session.mark_read(conversation.id).await.unwrap(), 1);

    // Live delivery into an open view
    let alice_session = ClientSession::connect(alice.clone()).await.unwrap();
    alice_session.enter(conversation.id).await.unwrap();
    let reply = alice_session
        .send_message(conversation.id, "how are you?")
        .await
        .unwrap();
    eventually("reply in bob's view", || async {
        bob_session
            .view(conversation.id)
            .await
            .is_some_and(|view| view.contains(reply.id))
    })
    .await;
    assert_eq!(bob_session.unread_count(conversation.id).await, 0);

    // React then unreact converges for the other participant
    bob_session.react(hello.id, "👍").await.unwrap();
    eventually("reaction visible to alice", || async {
        alice_session
            .view(conversation.id)
            .await
            .and_then(|view| view.get(hello.id).map(|m| m.reactions()))
            .is_some_and(|groups| groups.len() == 1 && groups[0].user_ids == vec![bob_id])
    })
    .await;

    assert!(bob_session.unreact(hello.id, "👍").await.unwrap());
    eventually("reaction gone for alice", || async {
        alice_session
            .view(conversation.id)
            .await
            .and_then(|view| view.get(hello.id).map(|m| m.reactions()))
            .is_some_and(|groups| groups.is_empty())
    })
    .await;

    // Deletion removes the message everywhere
    alice_session.delete_message(reply.id).await.unwrap();
    eventually("deletion reaches bob", || async {
        bob_session
            .view(conversation.id)
            .await
            .is_some_and(|view| !view.contains(reply.id))
    })
    .await;

    assert!(alice_session.is_online(bob_id).await);

    alice_session.close().await;
    bob_session.close().await;
}

#[tokio::test]
async fn outsiders_cannot_subscribe_or_read() {
    let base_url = start_server().await;
    let (_, alice) = sign_up(&base_url, "alice").await;
    let (bob_id, _) = sign_up(&base_url, "bob").await;
    let (_, mallory) = sign_up(&base_url, "mallory").await;

    let conversation = alice.open_conversation(bob_id).await.unwrap();

    let err = mallory.messages(conversation.id).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Forbidden));

    let session = ClientSession::connect(mallory).await.unwrap();
    match session.enter(conversation.id).await {
        Err(ClientError::Rejected { .. }) => {}
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(session.view(conversation.id).await.is_none());
    session.close().await;
}

#[tokio::test]
async fn gateway_refuses_bad_tokens() {
    let base_url = start_server().await;
    let client = ChatClient::new(&base_url, "not-a-token").unwrap();

    let err = client.me().await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Unauthorized));
    assert!(ClientSession::connect(client).await.is_err());
}

#[tokio::test]
async fn reconnect_reloads_open_conversations() {
    let server = serve().await;
    let base_url = format!("http://{}", server);
    let relay = Relay::start(server).await;

    let (_, alice) = sign_up(&base_url, "alice").await;
    let (bob_id, bob_direct) = sign_up(&base_url, "bob").await;
    let bob = ChatClient::new(&relay.url(), bob_direct.token()).unwrap();

    let conversation = alice.open_conversation(bob_id).await.unwrap();
    alice
        .send_message(conversation.id, "before", None)
        .await
        .unwrap();

    let backoff = Backoff::new(Duration::from_millis(20), Duration::from_millis(200));
    let session = ClientSession::connect_with_backoff(bob, backoff).await.unwrap();
    session.enter(conversation.id).await.unwrap();
    assert_eq!(session.view(conversation.id).await.unwrap().len(), 1);

    let mut updates = session.updates();
    relay.cut();
    wait_for_update(&mut updates, SessionUpdate::Disconnected).await;

    // Nobody is subscribed for bob while this is published
    let missed = alice
        .send_message(conversation.id, "while you were away", None)
        .await
        .unwrap();

    relay.restore();
    wait_for_update(&mut updates, SessionUpdate::Synced(conversation.id)).await;

    let view = session.view(conversation.id).await.unwrap();
    assert!(view.contains(missed.id));
    assert_eq!(view.len(), 2);

    session.close().await;
}
