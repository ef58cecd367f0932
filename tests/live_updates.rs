//! Live tally updates over a real listener and WebSocket clients.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use pollcast::polls::{create_engine, NewPoll, NewUser, PollEngine};
use pollcast::server::{build_router, serve, AppState};
use pollcast::store::MemoryStore;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    router: Router,
    engine: PollEngine,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let engine = create_engine(Arc::new(MemoryStore::new()), 16);
        let router = build_router(AppState::new(engine.clone()), "/ws");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let served = router.clone();
        tokio::spawn(async move {
            serve(listener, served, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });
        Self {
            addr,
            router,
            engine,
            shutdown: Some(tx),
        }
    }

    /// Connect and wait until the server has registered the observer.
    async fn observer(&self) -> Client {
        let before = self.engine.hub().registry().len();
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr)).await.unwrap();
        self.wait_for_connections(before + 1).await;
        client
    }

    async fn wait_for_connections(&self, n: usize) {
        for _ in 0..100 {
            if self.engine.hub().registry().len() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} connections, have {}",
            n,
            self.engine.hub().registry().len()
        );
    }

    async fn vote(&self, user: i64, option: i64) -> StatusCode {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/votes")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "userId": user, "pollOptionId": option }).to_string(),
            ))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap().status()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn next_update(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for update")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_quiet(client: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(waited.is_err(), "unexpected frame: {:?}", waited);
}

fn votes(update: &Value) -> Vec<u64> {
    update["payload"]["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["votes"].as_u64().unwrap())
        .collect()
}

/// Two users and a poll with options A and B.
async fn seed(engine: &PollEngine) -> (i64, i64, i64, i64, i64) {
    let u1 = engine
        .create_user(NewUser::new("U1", "u1@example.com"))
        .await
        .unwrap();
    let u2 = engine
        .create_user(NewUser::new("U2", "u2@example.com"))
        .await
        .unwrap();
    let poll = engine
        .create_poll(NewPoll::new("A or B?", ["A", "B"], u1.id))
        .await
        .unwrap();
    (u1.id, u2.id, poll.id, poll.options[0].id, poll.options[1].id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_observer_sees_each_accepted_vote() {
    let server = TestServer::start().await;
    let (u1, u2, poll, a, b) = seed(&server.engine).await;
    let mut first = server.observer().await;
    let mut second = server.observer().await;

    assert_eq!(server.vote(u1, a).await, StatusCode::CREATED);
    for client in [&mut first, &mut second] {
        let update = next_update(client).await;
        assert_eq!(update["type"], "POLL_UPDATE");
        assert_eq!(update["payload"]["pollId"], poll);
        assert_eq!(update["payload"]["question"], "A or B?");
        assert_eq!(votes(&update), vec![1, 0]);
    }

    assert_eq!(server.vote(u1, b).await, StatusCode::BAD_REQUEST);
    assert_quiet(&mut first).await;

    assert_eq!(server.vote(u2, b).await, StatusCode::CREATED);
    for client in [&mut first, &mut second] {
        assert_eq!(votes(&next_update(client).await), vec![1, 1]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_observer_gets_only_later_updates() {
    let server = TestServer::start().await;
    let (u1, u2, _, a, b) = seed(&server.engine).await;
    let mut early = server.observer().await;

    assert_eq!(server.vote(u1, a).await, StatusCode::CREATED);
    next_update(&mut early).await;

    let mut late = server.observer().await;
    assert_quiet(&mut late).await;

    assert_eq!(server.vote(u2, b).await, StatusCode::CREATED);
    assert_eq!(votes(&next_update(&mut late).await), vec![1, 1]);
    assert_eq!(votes(&next_update(&mut early).await), vec![1, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnected_observer_does_not_affect_others() {
    let server = TestServer::start().await;
    let (u1, _, _, a, _) = seed(&server.engine).await;
    let mut leaving = server.observer().await;
    let mut staying = server.observer().await;

    leaving.close(None).await.unwrap();
    drop(leaving);
    server.wait_for_connections(1).await;

    assert_eq!(server.vote(u1, a).await, StatusCode::CREATED);
    assert_eq!(votes(&next_update(&mut staying).await), vec![1, 0]);
    assert_eq!(server.engine.metrics().ws_connections.get(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inbound_frames_are_ignored() {
    let server = TestServer::start().await;
    let (u1, _, _, a, _) = seed(&server.engine).await;
    let mut client = server.observer().await;

    client
        .send(Message::Text("hello?".into()))
        .await
        .unwrap();
    assert_quiet(&mut client).await;
    assert_eq!(server.engine.hub().registry().len(), 1);

    assert_eq!(server.vote(u1, a).await, StatusCode::CREATED);
    assert_eq!(votes(&next_update(&mut client).await), vec![1, 0]);
}
