//! WebSocket signaling server over real sockets

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use rtc_detect::negotiation::{SessionDescription, SignalPayload};
use rtc_detect::pipeline::PipelineConfig;
use rtc_detect::relay::{Role, ServerControl};
use rtc_detect::{ServerConfig, SignalingServer};

use common::{init_tracing, FakeFactory, ScriptedDetector};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    addr: SocketAddr,
    server: Arc<SignalingServer>,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl Running {
    async fn start(server: SignalingServer) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server);
        let (stop, stopped) = oneshot::channel::<()>();

        let serving = Arc::clone(&server);
        let task = tokio::spawn(async move {
            serving
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            server,
            stop: Some(stop),
            task,
        }
    }

    async fn connect(&self) -> Client {
        let url = format!("ws://{}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn join(&self, session: &str, role: &str) -> (Client, ServerControl) {
        let mut ws = self.connect().await;
        let join = format!(r#"{{"join":{{"session":"{}","role":"{}"}}}}"#, session, role);
        ws.send(Message::text(join)).await.unwrap();
        let reply = next_control(&mut ws).await;
        (ws, reply)
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap();
    }
}

async fn next_text(ws: &mut Client) -> Option<String> {
    let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("no frame within 2s");
    match next {
        Some(Ok(Message::Text(text))) => Some(text),
        Some(Ok(Message::Binary(data))) => String::from_utf8(data).ok(),
        _ => None,
    }
}

async fn next_control(ws: &mut Client) -> ServerControl {
    let text = next_text(ws).await.expect("connection closed");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_join_is_acknowledged() {
    let running = Running::start(SignalingServer::new(ServerConfig::default())).await;

    let (_ws, reply) = running.join("s1", "sender").await;

    match reply {
        ServerControl::Joined { session, role, .. } => {
            assert_eq!(session, "s1");
            assert_eq!(role, Role::Sender);
        }
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(running.server.relay().member_count(&"s1".into()).await, 1);

    running.stop().await;
}

#[tokio::test]
async fn test_frames_relayed_between_members() {
    let running = Running::start(SignalingServer::new(ServerConfig::default())).await;

    let (mut phone, _) = running.join("s1", "sender").await;
    let (mut viewer, _) = running.join("s1", "receiver").await;

    phone.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_text(&mut viewer).await.unwrap(), r#"{"type":"ping"}"#);

    viewer.send(Message::text("pong")).await.unwrap();
    assert_eq!(next_text(&mut phone).await.unwrap(), "pong");

    running.stop().await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let running = Running::start(SignalingServer::new(ServerConfig::default())).await;

    let (mut a, _) = running.join("a", "sender").await;
    let (mut other, _) = running.join("b", "receiver").await;
    let (mut b, _) = running.join("a", "receiver").await;

    a.send(Message::text("for a only")).await.unwrap();
    assert_eq!(next_text(&mut b).await.unwrap(), "for a only");

    let leaked = tokio::time::timeout(Duration::from_millis(100), other.next()).await;
    assert!(leaked.is_err());

    running.stop().await;
}

#[tokio::test]
async fn test_duplicate_role_rejected() {
    let running = Running::start(SignalingServer::new(ServerConfig::default())).await;

    let (_first, _) = running.join("s1", "sender").await;
    let (_second, reply) = running.join("s1", "sender").await;

    assert!(matches!(reply, ServerControl::Error { .. }));
    assert_eq!(running.server.relay().member_count(&"s1".into()).await, 1);

    running.stop().await;
}

#[tokio::test]
async fn test_invalid_join_rejected() {
    let running = Running::start(SignalingServer::new(ServerConfig::default())).await;

    let mut ws = running.connect().await;
    ws.send(Message::text(r#"{"hello":"world"}"#)).await.unwrap();

    match next_control(&mut ws).await {
        ServerControl::Error { message } => assert!(message.starts_with("Invalid join message")),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert!(next_text(&mut ws).await.is_none());

    running.stop().await;
}

#[tokio::test]
async fn test_join_timeout() {
    let config = ServerConfig::default().join_timeout(Duration::from_millis(100));
    let running = Running::start(SignalingServer::new(config)).await;

    let mut ws = running.connect().await;

    match next_control(&mut ws).await {
        ServerControl::Error { message } => assert_eq!(message, "Join timeout"),
        other => panic!("unexpected reply: {:?}", other),
    }

    running.stop().await;
}

#[tokio::test]
async fn test_oversized_frame_dropped() {
    let config = ServerConfig::default().max_message_size(16);
    let running = Running::start(SignalingServer::new(config)).await;

    let (mut phone, _) = running.join("s1", "sender").await;
    let (mut viewer, _) = running.join("s1", "receiver").await;

    phone.send(Message::text("x".repeat(64))).await.unwrap();
    phone.send(Message::text("small")).await.unwrap();

    // The oversized frame never arrives; the socket stays usable
    assert_eq!(next_text(&mut viewer).await.unwrap(), "small");

    running.stop().await;
}

#[tokio::test]
async fn test_leave_on_disconnect() {
    let running = Running::start(SignalingServer::new(ServerConfig::default())).await;

    let (phone, _) = running.join("s1", "sender").await;
    let (_viewer, _) = running.join("s1", "receiver").await;
    assert_eq!(running.server.stats().active_connections, 2);

    drop(phone);

    let relay = Arc::clone(running.server.relay());
    common::eventually(|| {
        let relay = Arc::clone(&relay);
        async move { relay.member_count(&"s1".into()).await == 1 }
    })
    .await;

    // Role is free again
    let (_again, reply) = running.join("s1", "sender").await;
    assert!(matches!(reply, ServerControl::Joined { .. }));

    running.stop().await;
}

#[tokio::test]
async fn test_websocket_sender_negotiates_with_service() {
    let config =
        ServerConfig::default().pipeline(PipelineConfig::default().confidence_threshold(0.5));
    let server = SignalingServer::new(config);
    let (factory, mut controllers) = FakeFactory::with_controllers();
    let service = server.detection_service(factory, ScriptedDetector::new(vec![0.4, 0.7]));
    assert_eq!(service.pipeline().config().confidence_threshold, 0.5);
    assert!(Arc::ptr_eq(service.relay(), server.relay()));
    let running = Running::start(server).await;

    service.serve_session("room").await.unwrap();
    let (mut phone, reply) = running.join("room", "sender").await;
    assert!(matches!(reply, ServerControl::Joined { .. }));

    let offer = SignalPayload::Offer(SessionDescription::offer("v=0\r\ns=phone\r\n"));
    phone
        .send(Message::text(serde_json::to_string(&offer).unwrap()))
        .await
        .unwrap();

    let answer = SignalPayload::from_slice(next_text(&mut phone).await.unwrap().as_bytes()).unwrap();
    assert!(matches!(answer, SignalPayload::Answer(_)));

    let controller = controllers.recv().await.unwrap();
    let (feed, mut results) = controller.connect().await;

    let registry = Arc::clone(service.registry());
    let id = controller.id;
    common::eventually(|| {
        let registry = Arc::clone(&registry);
        async move {
            match registry.get(id).await {
                Some(conn) => conn.video_track().await.is_some(),
                None => false,
            }
        }
    })
    .await;

    feed.send(common::frame()).await;
    let text = tokio::time::timeout(Duration::from_secs(2), results.recv())
        .await
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["seq"], 0);
    assert_eq!(value["detections"].as_array().unwrap().len(), 1);

    service.shutdown().await;
    running.stop().await;
}
